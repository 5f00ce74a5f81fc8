//! Per-request driver for the data-mesh join engine.
//!
//! Runs after the primary backend call has produced its response and
//! decides, per relationship of the primary model, what to create, link,
//! update, or inline. Sibling relationships are processed concurrently and
//! fail independently; the primary response is never aborted here.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entity::logic_module_model;
use crate::error::DataMeshError;
use crate::pk::RecordPk;
use crate::registry::{RelationshipBinding, ServiceRegistry};
use crate::store::{JoinStore, JoinWriteCtx};

/// Ambient context travelling with the inbound request into every
/// backend sub-call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Bearer token, re-injected unchanged into sub-requests.
    pub token: Option<String>,
    pub organization: Option<Uuid>,
    pub user: Option<Uuid>,
}

/// One backend operation, addressed by logic module and model path.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub service: String,
    pub path: String,
    pub method: Method,
    pub pk: Option<String>,
    pub body: Option<Value>,
}

/// What came back from a backend, HTTP status included. 4xx/5xx replies
/// come through here verbatim; transport failures surface as errors.
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub status: u16,
    pub body: Value,
}

impl BackendReply {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Port through which the orchestrator reaches backend services. Local and
/// remote logic modules sit behind the same interface.
#[async_trait]
pub trait RelatedServiceClient: Send + Sync {
    async fn execute(
        &self,
        call: BackendCall,
        ctx: &CallContext,
    ) -> Result<BackendReply, DataMeshError>;
}

/// The three inbound query flags driving the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub join: bool,
    pub extend: bool,
    pub aggregate: bool,
}

impl ModeFlags {
    /// Parse mode flags out of a raw query string; flags are valueless
    /// (`?join&aggregate`) but `join=true` style is accepted too.
    pub fn from_query(query: &str) -> Self {
        let mut flags = Self::default();
        for pair in query.split('&') {
            match pair.split('=').next().unwrap_or("") {
                "join" => flags.join = true,
                "extend" => flags.extend = true,
                "aggregate" => flags.aggregate = true,
                _ => {}
            }
        }
        flags
    }

    pub fn any(&self) -> bool {
        self.join || self.extend || self.aggregate
    }
}

/// Input to one orchestrator pass.
#[derive(Debug, Clone)]
pub struct MeshRequest {
    pub method: Method,
    pub flags: ModeFlags,
    /// Inbound request body; relationship keys map to lists of sub-objects.
    pub body: Value,
    /// Primary backend response, object or list.
    pub resp_data: Value,
    pub primary_model: logic_module_model::Model,
    /// PK taken from the request path; drives join cleanup on DELETE.
    pub primary_pk: Option<RecordPk>,
    pub ctx: CallContext,
}

/// Result of one orchestrator pass. Partial success is a documented
/// outcome: `errors` is keyed by relationship, `warnings` collects soft
/// join-write failures.
#[derive(Debug)]
pub struct MeshOutcome {
    pub resp_data: Value,
    pub errors: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl MeshOutcome {
    pub(crate) fn passthrough(resp_data: Value) -> Self {
        Self {
            resp_data,
            errors: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

/// Everything one relationship pass needs, resolved up front from the
/// registry. Sub-requests never mutate shared request state.
#[derive(Debug, Clone)]
pub(crate) struct RelationContext {
    pub key: String,
    pub relationship_id: i32,
    /// Logic module of the far-side model.
    pub service: String,
    /// Model path of the far-side model, e.g. `/productteam/`.
    pub path: String,
    pub origin_pk_name: String,
    pub related_pk_name: String,
    pub fk_field_name: Option<String>,
    /// True when the primary record sits on the origin side.
    pub forward: bool,
}

impl RelationContext {
    pub(crate) fn new(binding: &RelationshipBinding, primary_model_id: i32) -> Self {
        let forward = binding.is_forward_for(primary_model_id);
        let target = if forward {
            &binding.related_model
        } else {
            &binding.origin_model
        };
        Self {
            key: binding.relationship.key.clone(),
            relationship_id: binding.relationship.id,
            service: target.logic_module_endpoint_name.clone(),
            path: target.endpoint.clone(),
            origin_pk_name: binding.origin_model.lookup_field_name.clone(),
            related_pk_name: binding.related_model.lookup_field_name.clone(),
            fk_field_name: binding.relationship.fk_field_name.clone(),
            forward,
        }
    }

    /// PK field of the primary record as this relationship sees it.
    pub(crate) fn primary_pk_name(&self) -> &str {
        if self.forward {
            &self.origin_pk_name
        } else {
            &self.related_pk_name
        }
    }

    /// PK field of the far-side record.
    pub(crate) fn target_pk_name(&self) -> &str {
        if self.forward {
            &self.related_pk_name
        } else {
            &self.origin_pk_name
        }
    }
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Pair a scalar with each element of a list-valued PK. When the related
/// side is a list it wins; there is no Cartesian expansion.
fn join_pairs(origin: &Value, related: &Value) -> Vec<(Value, Value)> {
    match (origin, related) {
        (origin, Value::Array(items)) => items
            .iter()
            .map(|related| (origin.clone(), related.clone()))
            .collect(),
        (Value::Array(items), related) => items
            .iter()
            .map(|origin| (origin.clone(), related.clone()))
            .collect(),
        (origin, related) => vec![(origin.clone(), related.clone())],
    }
}

/// A PK value as a URL path segment.
fn pk_segment(value: &Value) -> Result<String, DataMeshError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(DataMeshError::invalid_pk(other.to_string())),
    }
}

pub struct MeshOrchestrator {
    registry: ServiceRegistry,
    store: JoinStore,
    client: Arc<dyn RelatedServiceClient>,
}

impl MeshOrchestrator {
    pub fn new(
        registry: ServiceRegistry,
        store: JoinStore,
        client: Arc<dyn RelatedServiceClient>,
    ) -> Self {
        Self {
            registry,
            store,
            client,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &JoinStore {
        &self.store
    }

    pub(crate) fn client(&self) -> &dyn RelatedServiceClient {
        self.client.as_ref()
    }

    /// Run the per-relationship dispatch matrix for one inbound request.
    pub async fn process(&self, req: MeshRequest) -> Result<MeshOutcome, DataMeshError> {
        // Join creation is tenant-scoped; a request without an organization
        // cannot write joins (bulk seeding goes through its own path).
        if (req.flags.join || req.flags.extend)
            && req.method != Method::GET
            && req.ctx.organization.is_none()
        {
            return Err(DataMeshError::OrgRequired);
        }

        if req.method == Method::DELETE {
            let mut outcome = MeshOutcome::passthrough(req.resp_data);
            if let Some(pk) = &req.primary_pk {
                match self.store.delete_touching(pk).await {
                    Ok(removed) => {
                        tracing::debug!(pk = %pk, removed, "join records removed after delete")
                    }
                    Err(err) => outcome.warnings.push(format!("join cleanup failed: {err}")),
                }
            }
            return Ok(outcome);
        }

        if req.method == Method::GET {
            if req.flags.aggregate || req.flags.join {
                return crate::aggregate::expand(self, req).await;
            }
            return Ok(MeshOutcome::passthrough(req.resp_data));
        }

        let bindings = self.registry.relationships_for(req.primary_model.id).await?;
        let mut errors = BTreeMap::new();
        let mut warnings = Vec::new();

        if req.method == Method::POST && req.flags.extend {
            for binding in &bindings {
                let rel = RelationContext::new(binding, req.primary_model.id);
                self.extend_link(&req, &rel, &mut warnings).await;
            }
        } else if req.flags.join
            && (req.method == Method::POST
                || req.method == Method::PUT
                || req.method == Method::PATCH)
        {
            // Sibling relationships run concurrently and fail independently.
            let jobs = bindings.iter().map(|binding| {
                let rel = RelationContext::new(binding, req.primary_model.id);
                let req = &req;
                async move {
                    let result = self.process_relationship(req, &rel).await;
                    (rel.key, result)
                }
            });
            for (key, result) in futures::future::join_all(jobs).await {
                match result {
                    Ok(rel_warnings) => warnings.extend(rel_warnings),
                    Err(err) => {
                        tracing::warn!(relationship = %key, error = %err, "relationship processing failed");
                        errors.insert(key, err.to_string());
                    }
                }
            }
        }

        Ok(MeshOutcome {
            resp_data: req.resp_data,
            errors,
            warnings,
        })
    }

    /// POST with `extend`: link two already-existing records by PK only.
    /// No backend sub-request is issued.
    async fn extend_link(
        &self,
        req: &MeshRequest,
        rel: &RelationContext,
        warnings: &mut Vec<String>,
    ) {
        let origin_val = non_null(req.resp_data.get(&rel.origin_pk_name));
        let related_val = non_null(req.body.get(&rel.related_pk_name));
        if origin_val.is_some() && related_val.is_some() {
            self.write_join(rel, origin_val, related_val, &req.ctx, warnings)
                .await;
        }
    }

    /// One relationship's slice of a POST/PUT/PATCH `join` request.
    async fn process_relationship(
        &self,
        req: &MeshRequest,
        rel: &RelationContext,
    ) -> Result<Vec<String>, DataMeshError> {
        let mut warnings = Vec::new();

        let instances = match req.body.get(&rel.key) {
            Some(Value::Array(items)) if !items.is_empty() => items.clone(),
            _ => {
                // Empty or absent relationship array: an inline FK in the
                // primary payload still produces joins.
                self.validate_relationship_data(req, rel, &mut warnings)
                    .await;
                return Ok(warnings);
            }
        };

        for instance in instances {
            let Value::Object(obj) = instance else {
                return Err(DataMeshError::misconfigured(
                    &rel.key,
                    "relationship entries must be objects",
                ));
            };
            if req.method == Method::POST {
                self.create_related(req, rel, obj, &mut warnings).await?;
            } else {
                self.update_related(req, rel, obj, &mut warnings).await?;
            }
        }

        Ok(warnings)
    }

    /// Create a related object on its backend, then join it to the primary.
    async fn create_related(
        &self,
        req: &MeshRequest,
        rel: &RelationContext,
        mut obj: Map<String, Value>,
        warnings: &mut Vec<String>,
    ) -> Result<(), DataMeshError> {
        let primary_pk = non_null(req.resp_data.get(rel.primary_pk_name())).cloned();
        if let (Some(pk), Some(fk)) = (&primary_pk, rel.fk_field_name.as_deref()) {
            obj.insert(fk.to_owned(), pk.clone());
        }

        let reply = self
            .client
            .execute(
                BackendCall {
                    service: rel.service.clone(),
                    path: rel.path.clone(),
                    method: Method::POST,
                    pk: None,
                    body: Some(Value::Object(obj)),
                },
                &req.ctx,
            )
            .await?;
        if !reply.is_success() {
            return Err(DataMeshError::backend_rejected(
                &rel.service,
                reply.status,
                reply.body.to_string(),
            ));
        }

        // Link the two returned PKs: the primary response carries one side,
        // the created object the other.
        let (origin_val, related_val) = if rel.forward {
            (
                non_null(req.resp_data.get(&rel.origin_pk_name)),
                non_null(reply.body.get(&rel.related_pk_name)),
            )
        } else {
            (
                non_null(reply.body.get(&rel.origin_pk_name)),
                non_null(req.resp_data.get(&rel.related_pk_name)),
            )
        };
        self.write_join(rel, origin_val, related_val, &req.ctx, warnings)
            .await;
        Ok(())
    }

    /// PUT/PATCH handling for one sub-object:
    /// - no PK on the sub-object: fall back to create-and-join;
    /// - `previous_pk` present: re-point the join before forwarding;
    /// - otherwise: forward the update as-is.
    async fn update_related(
        &self,
        req: &MeshRequest,
        rel: &RelationContext,
        mut obj: Map<String, Value>,
        warnings: &mut Vec<String>,
    ) -> Result<(), DataMeshError> {
        let Some(target_pk) = non_null(obj.get(rel.target_pk_name())).cloned() else {
            return self.create_related(req, rel, obj, warnings).await;
        };

        if let Some(previous) = non_null(obj.get("previous_pk")).cloned() {
            let resp_val = non_null(req.resp_data.get(rel.primary_pk_name())).cloned();

            match (
                resp_val.as_ref().map(RecordPk::from_value),
                RecordPk::from_value(&previous),
            ) {
                (Some(Ok(res_pk)), Ok(previous_pk)) => {
                    if let Err(err) = self.store.delete_matching(&res_pk, &previous_pk).await {
                        warnings.push(format!("{}: stale join not removed: {err}", rel.key));
                    }
                }
                _ => warnings.push(format!(
                    "{}: previous_pk present but PKs were unusable, stale join kept",
                    rel.key
                )),
            }

            let (origin_val, related_val) = if rel.forward {
                (resp_val, Some(target_pk.clone()))
            } else {
                (Some(target_pk.clone()), resp_val)
            };
            self.write_join(
                rel,
                origin_val.as_ref(),
                related_val.as_ref(),
                &req.ctx,
                warnings,
            )
            .await;
        }

        // Forward the update itself, minus the join-control fields.
        obj.remove("previous_pk");
        obj.remove("join");
        let reply = self
            .client
            .execute(
                BackendCall {
                    service: rel.service.clone(),
                    path: rel.path.clone(),
                    method: req.method.clone(),
                    pk: Some(pk_segment(&target_pk)?),
                    body: Some(Value::Object(obj)),
                },
                &req.ctx,
            )
            .await?;
        if !reply.is_success() {
            return Err(DataMeshError::backend_rejected(
                &rel.service,
                reply.status,
                reply.body.to_string(),
            ));
        }
        Ok(())
    }

    /// Empty-relationship-array policy: when the primary payload already
    /// carries the FK field of a related model, the join is created
    /// idempotently without any sub-request.
    async fn validate_relationship_data(
        &self,
        req: &MeshRequest,
        rel: &RelationContext,
        warnings: &mut Vec<String>,
    ) {
        let Some(fk) = rel.fk_field_name.as_deref() else {
            return;
        };
        let origin_val = non_null(req.resp_data.get(&rel.origin_pk_name));
        let related_val = non_null(req.resp_data.get(fk));
        if origin_val.is_some() && related_val.is_some() {
            self.write_join(rel, origin_val, related_val, &req.ctx, warnings)
                .await;
        }
    }

    /// Idempotently persist joins for the given PK values, expanding
    /// list-valued sides. Store failures downgrade to warnings; the client
    /// still gets the primary response.
    async fn write_join(
        &self,
        rel: &RelationContext,
        origin: Option<&Value>,
        related: Option<&Value>,
        ctx: &CallContext,
        warnings: &mut Vec<String>,
    ) {
        let (Some(origin), Some(related)) = (origin, related) else {
            warnings.push(format!("{}: missing PK value, join not recorded", rel.key));
            return;
        };

        let write_ctx = JoinWriteCtx::for_request(ctx.organization);
        for (origin_val, related_val) in join_pairs(origin, related) {
            let origin_pk = match RecordPk::from_value(&origin_val) {
                Ok(pk) => pk,
                Err(err) => {
                    warnings.push(format!("{}: {err}", rel.key));
                    continue;
                }
            };
            let related_pk = match RecordPk::from_value(&related_val) {
                Ok(pk) => pk,
                Err(err) => {
                    warnings.push(format!("{}: {err}", rel.key));
                    continue;
                }
            };
            if let Err(err) = self
                .store
                .validate_join(rel.relationship_id, &origin_pk, &related_pk, &write_ctx)
                .await
            {
                tracing::warn!(relationship = %rel.key, error = %err, "join record not written");
                warnings.push(format!("{}: join not recorded: {err}", rel.key));
            }
        }
    }
}
