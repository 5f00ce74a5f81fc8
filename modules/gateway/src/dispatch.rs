//! Inbound request routing: first path segment → logic module, remainder →
//! backend sub-path. Local and remote logic modules sit behind the same
//! dispatch surface, so the mesh orchestrator cannot tell them apart.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use http::Method;
use serde_json::Value;

use crate::client::{BackendClient, BackendRequest};
use crate::error::GatewayError;
use crate::spec_cache::SpecCache;
use datamesh::entity::{logic_module, logic_module_model};
use datamesh::{
    BackendCall, BackendReply, CallContext, DataMeshError, RelatedServiceClient, ServiceRegistry,
};

/// A backend served from inside the gateway process.
#[async_trait]
pub trait LocalService: Send + Sync {
    async fn handle(&self, req: LocalRequest) -> Result<BackendReply, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct LocalRequest {
    pub method: Method,
    /// Normalized sub-path, PK segment included, e.g. `/coreuser/u1/`.
    pub path: String,
    pub pk: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub ctx: CallContext,
}

/// What the primary dispatch produced; feeds the mesh orchestrator.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub reply: BackendReply,
    pub module: logic_module::Model,
    /// The registry model the sub-path targets, when one is registered.
    pub model: Option<logic_module_model::Model>,
    /// PK segment of the sub-path, when present.
    pub pk: Option<String>,
}

pub struct Dispatcher {
    registry: ServiceRegistry,
    specs: Arc<SpecCache>,
    client: BackendClient,
    locals: DashMap<String, Arc<dyn LocalService>>,
}

/// `"product/u1"` → `"/product/u1/"`. Backend model paths always carry
/// leading and trailing slashes.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}/")
    }
}

impl Dispatcher {
    pub fn new(registry: ServiceRegistry, specs: Arc<SpecCache>, client: BackendClient) -> Self {
        Self {
            registry,
            specs,
            client,
            locals: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn specs(&self) -> &SpecCache {
        &self.specs
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Register the in-process handler for a local logic module.
    pub fn register_local(&self, endpoint_name: impl Into<String>, service: Arc<dyn LocalService>) {
        self.locals.insert(endpoint_name.into(), service);
    }

    fn local(&self, endpoint_name: &str) -> Option<Arc<dyn LocalService>> {
        self.locals
            .get(endpoint_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Route and execute the primary request.
    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        ctx: &CallContext,
    ) -> Result<DispatchOutcome, GatewayError> {
        let trimmed = path.trim_start_matches('/');
        let (service, sub_path) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        if service.is_empty() {
            return Err(GatewayError::RouteNotFound(path.to_owned()));
        }

        let module = self
            .registry
            .find_logic_module(service)
            .await
            .map_err(GatewayError::from)?
            .ok_or_else(|| GatewayError::RouteNotFound(service.to_owned()))?;

        let mut parts = sub_path.split('/').filter(|s| !s.is_empty());
        let model_segment = parts.next().unwrap_or("");
        let pk = parts.next().map(str::to_owned);

        let model = if model_segment.is_empty() {
            None
        } else {
            self.registry
                .find_model_by_endpoint(service, model_segment)
                .await
                .map_err(GatewayError::from)?
        };

        let full_path = normalize_path(sub_path);
        let reply = self
            .execute(&module, method, &full_path, pk.as_deref(), query, body, ctx)
            .await?;

        Ok(DispatchOutcome {
            reply,
            module,
            model,
            pk,
        })
    }

    /// Uniform execution for local and remote modules.
    async fn execute(
        &self,
        module: &logic_module::Model,
        method: Method,
        path: &str,
        pk: Option<&str>,
        query: &[(String, String)],
        body: Option<&Value>,
        ctx: &CallContext,
    ) -> Result<BackendReply, GatewayError> {
        if module.is_local {
            let local = self.local(&module.endpoint_name).ok_or_else(|| {
                GatewayError::RouteNotFound(module.endpoint_name.clone())
            })?;
            return local
                .handle(LocalRequest {
                    method,
                    path: path.to_owned(),
                    pk: pk.map(str::to_owned),
                    query: query.to_vec(),
                    body: body.cloned(),
                    ctx: ctx.clone(),
                })
                .await;
        }

        let spec = self.specs.get(module).await?;
        self.client
            .request(
                &spec,
                BackendRequest {
                    method,
                    path,
                    query,
                    body,
                },
                ctx,
            )
            .await
    }
}

/// Bridges the orchestrator's backend port onto the dispatcher, so mesh
/// sub-requests take the same spec-cache/client/local path as primaries.
pub struct MeshBackendAdapter {
    dispatcher: Arc<Dispatcher>,
}

impl MeshBackendAdapter {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl RelatedServiceClient for MeshBackendAdapter {
    async fn execute(
        &self,
        call: BackendCall,
        ctx: &CallContext,
    ) -> Result<BackendReply, DataMeshError> {
        let path = match &call.pk {
            Some(pk) => normalize_path(&format!("{}/{}", call.path.trim_matches('/'), pk)),
            None => normalize_path(&call.path),
        };

        let module = self
            .dispatcher
            .registry()
            .find_logic_module(&call.service)
            .await?
            .ok_or_else(|| DataMeshError::LogicModuleNotFound(call.service.clone()))?;

        self.dispatcher
            .execute(
                &module,
                call.method.clone(),
                &path,
                call.pk.as_deref(),
                &[],
                call.body.as_ref(),
                ctx,
            )
            .await
            .map_err(|err| match err {
                GatewayError::BackendTimeout { service } => DataMeshError::backend_unavailable(
                    service,
                    "timed out",
                ),
                other => DataMeshError::backend_unavailable(call.service.clone(), other.to_string()),
            })
    }
}
