//! TTL cache of parsed backend OpenAPI documents, one entry per logic
//! module, with single-flight fetches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::spec::ServiceSpec;
use datamesh::entity::logic_module;

struct CacheEntry {
    spec: Arc<ServiceSpec>,
    fetched_at: Instant,
}

pub struct SpecCache {
    http: reqwest::Client,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    // One async gate per endpoint_name so concurrent misses coalesce.
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl SpecCache {
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http,
            ttl,
            entries: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    /// Fetch-or-reuse the spec for a logic module. Failures are returned to
    /// the caller and never cached; the next request retries.
    pub async fn get(
        &self,
        module: &logic_module::Model,
    ) -> Result<Arc<ServiceSpec>, GatewayError> {
        if let Some(spec) = self.fresh(&module.endpoint_name) {
            return Ok(spec);
        }

        let gate = self
            .inflight
            .entry(module.endpoint_name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // The winner of the gate may have filled the cache already.
        if let Some(spec) = self.fresh(&module.endpoint_name) {
            return Ok(spec);
        }

        let spec = self.fetch(module).await?;
        self.entries.insert(
            module.endpoint_name.clone(),
            CacheEntry {
                spec: spec.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(spec)
    }

    pub fn invalidate(&self, endpoint_name: &str) {
        self.entries.remove(endpoint_name);
    }

    fn fresh(&self, key: &str) -> Option<Arc<ServiceSpec>> {
        self.entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.spec.clone())
    }

    async fn fetch(
        &self,
        module: &logic_module::Model,
    ) -> Result<Arc<ServiceSpec>, GatewayError> {
        tracing::debug!(
            service = %module.endpoint_name,
            url = %module.docs_endpoint,
            "fetching OpenAPI document"
        );

        let unavailable = |reason: String| GatewayError::SpecUnavailable {
            service: module.endpoint_name.clone(),
            reason,
        };

        let response = self
            .http
            .get(&module.docs_endpoint)
            .send()
            .await
            .map_err(|err| unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!(
                "docs endpoint returned {}",
                response.status()
            )));
        }

        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|err| unavailable(err.to_string()))?;

        let spec = ServiceSpec::parse(&module.endpoint_name, &module.endpoint, &document)
            .map_err(|err| unavailable(err.to_string()))?;
        Ok(Arc::new(spec))
    }
}
