//! GET-side expansion: look up join records for the primary record, fetch
//! each related object from its backend, and inline the payloads under the
//! relationship key.
//!
//! Expansion is bounded to one hop: inlined payloads are used verbatim and
//! never expanded further, so cyclic relationships cannot recurse.

use futures::stream::{self, StreamExt};
use http::Method;
use serde_json::{Map, Value};

use crate::error::DataMeshError;
use crate::orchestrator::{
    BackendCall, CallContext, MeshOrchestrator, MeshOutcome, MeshRequest, RelationContext,
};
use crate::pk::RecordPk;

/// How many list elements expand concurrently.
const LIST_EXPANSION_CONCURRENCY: usize = 8;

pub(crate) async fn expand(
    orch: &MeshOrchestrator,
    req: MeshRequest,
) -> Result<MeshOutcome, DataMeshError> {
    let bindings = orch
        .registry()
        .relationships_for(req.primary_model.id)
        .await?;
    if bindings.is_empty() {
        return Ok(MeshOutcome::passthrough(req.resp_data));
    }

    let rels: Vec<RelationContext> = bindings
        .iter()
        .map(|binding| RelationContext::new(binding, req.primary_model.id))
        .collect();
    let lookup_field = req.primary_model.lookup_field_name.clone();
    let ctx = req.ctx.clone();

    let resp_data = match req.resp_data {
        Value::Array(items) => {
            // List responses resolve relationships per element.
            let expanded = stream::iter(items)
                .map(|item| expand_object(orch, &rels, &lookup_field, item, &ctx))
                .buffered(LIST_EXPANSION_CONCURRENCY)
                .collect::<Vec<_>>()
                .await;
            Value::Array(expanded)
        }
        item @ Value::Object(_) => expand_object(orch, &rels, &lookup_field, item, &ctx).await,
        other => other,
    };

    Ok(MeshOutcome::passthrough(resp_data))
}

/// Expand every relationship of a single response object. Failures are
/// collected into the object's `_mesh_errors` map; sibling relationships
/// are unaffected.
async fn expand_object(
    orch: &MeshOrchestrator,
    rels: &[RelationContext],
    lookup_field: &str,
    item: Value,
    ctx: &CallContext,
) -> Value {
    let mut obj = match item {
        Value::Object(obj) => obj,
        other => return other,
    };

    let pk = match obj.get(lookup_field).map(RecordPk::from_value) {
        Some(Ok(pk)) => pk,
        _ => {
            tracing::debug!(lookup_field, "no usable PK in response element, skipping expansion");
            return Value::Object(obj);
        }
    };

    let jobs = rels.iter().map(|rel| {
        let pk = &pk;
        async move {
            (
                rel.key.clone(),
                expand_relationship(orch, rel, pk, ctx).await,
            )
        }
    });

    let mut errors = Map::new();
    for (key, result) in futures::future::join_all(jobs).await {
        match result {
            Ok(payloads) => {
                // Always an array, even for 1:1 relationships.
                obj.insert(key, Value::Array(payloads));
            }
            Err(message) => {
                errors.insert(key, Value::String(message));
            }
        }
    }
    if !errors.is_empty() {
        obj.insert("_mesh_errors".to_owned(), Value::Object(errors));
    }

    Value::Object(obj)
}

/// Fetch every related object of one relationship. Any failed sub-request
/// fails the whole relationship; nothing partial is inlined.
async fn expand_relationship(
    orch: &MeshOrchestrator,
    rel: &RelationContext,
    pk: &RecordPk,
    ctx: &CallContext,
) -> Result<Vec<Value>, String> {
    let related = orch
        .store()
        .find_related(rel.relationship_id, pk, rel.forward, ctx.organization)
        .await
        .map_err(|err| err.to_string())?;

    let fetches = related.iter().map(|related_pk| async move {
        let call = BackendCall {
            service: rel.service.clone(),
            path: rel.path.clone(),
            method: Method::GET,
            pk: Some(related_pk.to_string()),
            body: None,
        };
        match orch.client().execute(call, ctx).await {
            Ok(reply) if reply.is_success() => Ok(reply.body),
            Ok(reply) => Err(format!(
                "backend '{}' returned {}",
                rel.service, reply.status
            )),
            Err(err) => Err(err.to_string()),
        }
    });

    let mut payloads = Vec::with_capacity(related.len());
    for result in futures::future::join_all(fetches).await {
        payloads.push(result?);
    }
    Ok(payloads)
}
