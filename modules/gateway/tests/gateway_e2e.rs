use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use httpmock::prelude::*;
use jsonwebtoken::{encode, EncodingKey, Header};
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use datamesh::entity::relationship;
use datamesh::{
    BackendReply, JoinStore, JoinWriteCtx, MeshOrchestrator, NewLogicModule, NewModel, RecordPk,
    ServiceRegistry,
};
use gateway::{
    BackendClient, CorsOptions, Dispatcher, Gateway, GatewayConfig, GatewayError, LocalRequest,
    LocalService, MeshBackendAdapter, SecuritySettings, SpecCache,
};

const SECRET: &str = "test-secret";
const TEAM_REL_KEY: &str = "product_product_team_relationship";
const TOOL_REL_KEY: &str = "product_product_tool_relationship";

fn token_for(org: Uuid) -> String {
    let claims = json!({
        "organization_uuid": org,
        "core_user_uuid": Uuid::new_v4(),
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn products_doc() -> Value {
    json!({
        "swagger": "2.0",
        "paths": {
            "/product/": {"get": {}, "post": {}},
            "/product/{uuid}/": {"get": {}, "put": {}, "patch": {}, "delete": {}}
        }
    })
}

fn crm_doc() -> Value {
    json!({
        "swagger": "2.0",
        "paths": {
            "/productteam/": {"get": {}, "post": {}},
            "/productteam/{uuid}/": {"get": {}, "put": {}, "patch": {}, "delete": {}},
            "/producttool/": {"get": {}, "post": {}},
            "/producttool/{uuid}/": {"get": {}, "put": {}, "patch": {}, "delete": {}}
        }
    })
}

struct TestStack {
    router: Router,
    db: DatabaseConnection,
    dispatcher: Arc<Dispatcher>,
    team_rel: relationship::Model,
    tool_rel: relationship::Model,
    org: Uuid,
    token: String,
}

async fn setup(products: &MockServer, crm: &MockServer) -> TestStack {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to test database");
    datamesh::migrations::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let registry = ServiceRegistry::new(db.clone());
    registry
        .upsert_logic_module(NewLogicModule {
            endpoint_name: "products".into(),
            endpoint: products.base_url(),
            docs_endpoint: products.url("/docs"),
            is_local: false,
        })
        .await
        .unwrap();
    registry
        .upsert_logic_module(NewLogicModule {
            endpoint_name: "crm".into(),
            endpoint: crm.base_url(),
            docs_endpoint: crm.url("/docs"),
            is_local: false,
        })
        .await
        .unwrap();

    let product = registry
        .upsert_logic_module_model(NewModel {
            model: "Product".into(),
            logic_module_endpoint_name: "products".into(),
            endpoint: "/product/".into(),
            lookup_field_name: "product_uuid".into(),
            is_local: false,
        })
        .await
        .unwrap();
    let team = registry
        .upsert_logic_module_model(NewModel {
            model: "ProductTeam".into(),
            logic_module_endpoint_name: "crm".into(),
            endpoint: "/productteam/".into(),
            lookup_field_name: "product_team_uuid".into(),
            is_local: false,
        })
        .await
        .unwrap();
    let tool = registry
        .upsert_logic_module_model(NewModel {
            model: "ProductTool".into(),
            logic_module_endpoint_name: "crm".into(),
            endpoint: "/producttool/".into(),
            lookup_field_name: "product_tool_uuid".into(),
            is_local: false,
        })
        .await
        .unwrap();

    let team_rel = registry
        .upsert_relationship(product.id, team.id, TEAM_REL_KEY, Some("product_team_uuid"))
        .await
        .unwrap();
    let tool_rel = registry
        .upsert_relationship(product.id, tool.id, TOOL_REL_KEY, Some("product_tool_uuid"))
        .await
        .unwrap();

    products.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(products_doc());
    });
    crm.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200).json_body(crm_doc());
    });

    let config = GatewayConfig::default();
    let http = reqwest::Client::new();
    let specs = Arc::new(SpecCache::new(http.clone(), config.spec_ttl));
    let client = BackendClient::new(http, config.backend_timeout);
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), specs, client));
    let adapter = Arc::new(MeshBackendAdapter::new(dispatcher.clone()));
    let orchestrator = Arc::new(MeshOrchestrator::new(
        registry,
        JoinStore::new(db.clone()),
        adapter,
    ));

    let gateway = Gateway::new(
        config,
        CorsOptions::default(),
        dispatcher.clone(),
        orchestrator,
        SecuritySettings {
            token_secret: SECRET.into(),
        },
    );
    let router = gateway.build_router();

    let org = Uuid::new_v4();
    let token = token_for(org);
    TestStack {
        router,
        db,
        dispatcher,
        team_rel,
        tool_rel,
        org,
        token,
    }
}

fn request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoints_skip_auth() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let response = stack
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let response = stack
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/products/product/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_service_is_not_found() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let response = stack
        .router
        .clone()
        .oneshot(request("GET", "/nope/thing/", &stack.token, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], "route_not_found");
}

#[tokio::test]
async fn primary_requests_forward_credentials_and_query() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let list = products.mock(|when, then| {
        when.method(GET)
            .path("/product/")
            .query_param("page", "2")
            .header("authorization", format!("Bearer {}", stack.token))
            .header_exists("x-forwarded-org");
        then.status(200).json_body(json!([]));
    });

    let response = stack
        .router
        .clone()
        .oneshot(request(
            "GET",
            "/products/product/?page=2",
            &stack.token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    list.assert();
}

#[tokio::test]
async fn backend_errors_pass_through_verbatim() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let missing = Uuid::new_v4();
    products.mock(|when, then| {
        when.method(GET).path(format!("/product/{missing}/"));
        then.status(404).json_body(json!({"detail": "not found"}));
    });

    let response = stack
        .router
        .clone()
        .oneshot(request(
            "GET",
            &format!("/products/product/{missing}/"),
            &stack.token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["detail"], "not found");
}

#[tokio::test]
async fn post_with_join_creates_and_links_sub_objects() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let product_uuid = Uuid::new_v4();
    let team_uuid = Uuid::new_v4();

    let create_product = products.mock(|when, then| {
        when.method(POST).path("/product/");
        then.status(201)
            .json_body(json!({"product_uuid": product_uuid, "name": "X"}));
    });
    let create_team = crm.mock(|when, then| {
        when.method(POST).path("/productteam/");
        then.status(201)
            .json_body(json!({"product_team_uuid": team_uuid, "team_name": "T"}));
    });

    let response = stack
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/products/product/?join",
            &stack.token,
            Some(json!({
                "name": "X",
                TEAM_REL_KEY: [{"team_name": "T"}],
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["product_uuid"], json!(product_uuid));
    assert!(body.get("_mesh_errors").is_none());

    create_product.assert();
    create_team.assert();

    let store = JoinStore::new(stack.db.clone());
    assert!(store
        .exists(
            stack.team_rel.id,
            &RecordPk::Uuid(product_uuid),
            &RecordPk::Uuid(team_uuid)
        )
        .await
        .unwrap());
}

#[tokio::test]
async fn post_with_extend_links_by_pk_only() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();

    let create_product = products.mock(|when, then| {
        when.method(POST).path("/product/");
        then.status(200).json_body(json!({"product_uuid": u1}));
    });
    let crm_posts = crm.mock(|when, then| {
        when.method(POST);
        then.status(500);
    });

    let response = stack
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/products/product/?extend",
            &stack.token,
            Some(json!({"product_uuid": u1, "product_tool_uuid": u2})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    create_product.assert();
    // No sub-object creation on extend.
    crm_posts.assert_hits(0);

    let store = JoinStore::new(stack.db.clone());
    assert!(store
        .exists(stack.tool_rel.id, &RecordPk::Uuid(u1), &RecordPk::Uuid(u2))
        .await
        .unwrap());
}

#[tokio::test]
async fn get_aggregate_expands_list_elements() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();
    let t1 = Uuid::new_v4();
    let t2 = Uuid::new_v4();

    let store = JoinStore::new(stack.db.clone());
    let write_ctx = JoinWriteCtx::for_request(Some(stack.org));
    for (product, team) in [(p1, t1), (p2, t2)] {
        store
            .insert(
                stack.team_rel.id,
                &RecordPk::Uuid(product),
                &RecordPk::Uuid(team),
                &write_ctx,
            )
            .await
            .unwrap();
    }

    products.mock(|when, then| {
        when.method(GET).path("/product/");
        then.status(200).json_body(json!([
            {"product_uuid": p1, "name": "one"},
            {"product_uuid": p2, "name": "two"},
        ]));
    });
    for team in [t1, t2] {
        crm.mock(|when, then| {
            when.method(GET).path(format!("/productteam/{team}/"));
            then.status(200)
                .json_body(json!({"product_team_uuid": team, "team_name": "T"}));
        });
    }

    let response = stack
        .router
        .clone()
        .oneshot(request(
            "GET",
            "/products/product/?aggregate",
            &stack.token,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    for (item, team) in items.iter().zip([t1, t2]) {
        let teams = item[TEAM_REL_KEY].as_array().unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0]["product_team_uuid"], json!(team));
        // No tool joins: uniform empty array.
        assert_eq!(item[TOOL_REL_KEY].as_array().unwrap().len(), 0);
    }
}

#[tokio::test]
async fn aggregate_isolates_failing_backends() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let u1 = Uuid::new_v4();
    let t1 = Uuid::new_v4();

    let store = JoinStore::new(stack.db.clone());
    store
        .insert(
            stack.team_rel.id,
            &RecordPk::Uuid(u1),
            &RecordPk::Uuid(t1),
            &JoinWriteCtx::for_request(Some(stack.org)),
        )
        .await
        .unwrap();

    products.mock(|when, then| {
        when.method(GET).path(format!("/product/{u1}/"));
        then.status(200)
            .json_body(json!({"product_uuid": u1, "name": "X"}));
    });
    crm.mock(|when, then| {
        when.method(GET).path(format!("/productteam/{t1}/"));
        then.status(500).json_body(json!({"detail": "down"}));
    });

    let response = stack
        .router
        .clone()
        .oneshot(request(
            "GET",
            &format!("/products/product/{u1}/?aggregate"),
            &stack.token,
            None,
        ))
        .await
        .unwrap();
    // The primary response survives the failed relationship.
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["product_uuid"], json!(u1));
    assert!(body.get(TEAM_REL_KEY).is_none());
    assert!(body["_mesh_errors"]
        .as_object()
        .unwrap()
        .contains_key(TEAM_REL_KEY));
}

struct UsersDirectory;

#[async_trait]
impl LocalService for UsersDirectory {
    async fn handle(&self, req: LocalRequest) -> Result<BackendReply, GatewayError> {
        Ok(BackendReply {
            status: 200,
            body: json!({"path": req.path, "users": []}),
        })
    }
}

#[tokio::test]
async fn local_modules_dispatch_in_process() {
    let products = MockServer::start();
    let crm = MockServer::start();
    let stack = setup(&products, &crm).await;

    let registry = ServiceRegistry::new(stack.db.clone());
    registry
        .upsert_logic_module(NewLogicModule {
            endpoint_name: "core".into(),
            endpoint: "http://gateway.internal".into(),
            docs_endpoint: "http://gateway.internal/docs".into(),
            is_local: true,
        })
        .await
        .unwrap();
    stack
        .dispatcher
        .register_local("core", Arc::new(UsersDirectory));

    let response = stack
        .router
        .clone()
        .oneshot(request("GET", "/core/coreuser/", &stack.token, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["path"], "/coreuser/");
    assert_eq!(body["users"], json!([]));
}
