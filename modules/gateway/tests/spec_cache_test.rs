use std::sync::Arc;
use std::time::Duration;

use datamesh::entity::logic_module;
use gateway::{GatewayError, SpecCache};
use httpmock::prelude::*;
use serde_json::json;

fn module_for(server: &MockServer) -> logic_module::Model {
    logic_module::Model {
        id: 1,
        endpoint_name: "products".to_string(),
        endpoint: server.base_url(),
        docs_endpoint: server.url("/docs"),
        is_local: false,
    }
}

fn products_doc() -> serde_json::Value {
    json!({
        "swagger": "2.0",
        "paths": {
            "/product/": {"get": {}, "post": {}},
            "/product/{uuid}/": {"get": {}, "put": {}, "patch": {}, "delete": {}}
        }
    })
}

#[tokio::test]
async fn repeated_gets_reuse_the_cached_document() {
    let server = MockServer::start();
    let docs = server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(products_doc());
    });

    let cache = SpecCache::new(reqwest::Client::new(), Duration::from_secs(3600));
    let module = module_for(&server);

    let first = cache.get(&module).await.unwrap();
    let second = cache.get(&module).await.unwrap();
    assert_eq!(first.endpoint_name, "products");
    assert_eq!(second.endpoint_name, "products");

    docs.assert_hits(1);
}

#[tokio::test]
async fn concurrent_misses_coalesce_into_one_fetch() {
    let server = MockServer::start();
    let docs = server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(products_doc());
    });

    let cache = Arc::new(SpecCache::new(
        reqwest::Client::new(),
        Duration::from_secs(3600),
    ));
    let module = module_for(&server);

    let gets = (0..8).map(|_| {
        let cache = cache.clone();
        let module = module.clone();
        async move { cache.get(&module).await }
    });
    let results = futures::future::join_all(gets).await;
    assert!(results.iter().all(|r| r.is_ok()));

    docs.assert_hits(1);
}

#[tokio::test]
async fn expired_entries_are_refetched() {
    let server = MockServer::start();
    let docs = server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(products_doc());
    });

    let cache = SpecCache::new(reqwest::Client::new(), Duration::from_millis(50));
    let module = module_for(&server);

    cache.get(&module).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    cache.get(&module).await.unwrap();

    docs.assert_hits(2);
}

#[tokio::test]
async fn invalidate_forces_a_refetch() {
    let server = MockServer::start();
    let docs = server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(products_doc());
    });

    let cache = SpecCache::new(reqwest::Client::new(), Duration::from_secs(3600));
    let module = module_for(&server);

    cache.get(&module).await.unwrap();
    cache.invalidate(&module.endpoint_name);
    cache.get(&module).await.unwrap();

    docs.assert_hits(2);
}

#[tokio::test]
async fn failures_are_never_cached() {
    let server = MockServer::start();

    // Not an OpenAPI document at all.
    let mut bad = server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(json!({"hello": "world"}));
    });

    let cache = SpecCache::new(reqwest::Client::new(), Duration::from_secs(3600));
    let module = module_for(&server);

    let err = cache.get(&module).await.unwrap_err();
    assert!(matches!(err, GatewayError::SpecUnavailable { .. }));
    bad.assert_hits(1);
    bad.delete();

    // The next request retries and succeeds.
    let good = server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(products_doc());
    });
    let spec = cache.get(&module).await.unwrap();
    assert_eq!(spec.endpoint_name, "products");
    good.assert_hits(1);
}

#[tokio::test]
async fn unreachable_docs_endpoint_is_spec_unavailable() {
    let server = MockServer::start();
    let docs = server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(500);
    });

    let cache = SpecCache::new(reqwest::Client::new(), Duration::from_secs(3600));
    let module = module_for(&server);

    let err = cache.get(&module).await.unwrap_err();
    assert!(matches!(err, GatewayError::SpecUnavailable { .. }));
    docs.assert_hits(1);
}
