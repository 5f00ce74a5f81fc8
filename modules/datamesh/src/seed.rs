//! Bulk import of logic modules, models, relationships, and join records.
//!
//! Seed files are the administrator path for populating the registry; all
//! operations are idempotent, so re-applying a file is safe.

use sea_orm::DatabaseConnection;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::DataMeshError;
use crate::pk::RecordPk;
use crate::registry::{NewLogicModule, NewModel, ServiceRegistry};
use crate::store::{JoinOutcome, JoinStore, JoinWriteCtx};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("invalid seed file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown model '{module}.{model}' referenced by relationship '{key}'")]
    UnknownModel {
        module: String,
        model: String,
        key: String,
    },

    #[error("invalid join entry for '{relationship}': {detail}")]
    InvalidJoin {
        relationship: String,
        detail: String,
    },

    #[error(transparent)]
    DataMesh(#[from] DataMeshError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub logic_modules: Vec<SeedLogicModule>,
    #[serde(default)]
    pub models: Vec<SeedModel>,
    #[serde(default)]
    pub relationships: Vec<SeedRelationship>,
    #[serde(default)]
    pub joins: Vec<SeedJoin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedLogicModule {
    pub endpoint_name: String,
    pub endpoint: String,
    pub docs_endpoint: String,
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedModel {
    pub model: String,
    pub logic_module_endpoint_name: String,
    pub endpoint: String,
    pub lookup_field_name: String,
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRelationship {
    pub origin_module: String,
    pub origin_model: String,
    pub related_module: String,
    pub related_model: String,
    pub key: String,
    #[serde(default)]
    pub fk_field_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedJoin {
    pub relationship: String,
    pub origin_pk: String,
    pub related_pk: String,
    /// Absent organization makes the join globally visible.
    #[serde(default)]
    pub organization: Option<Uuid>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub logic_modules: usize,
    pub models: usize,
    pub relationships: usize,
    pub joins_created: usize,
    pub joins_existing: usize,
}

impl SeedFile {
    /// Seed files are YAML; JSON parses as a YAML subset.
    pub fn parse(raw: &str) -> Result<Self, SeedError> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

pub async fn apply(db: &DatabaseConnection, file: SeedFile) -> Result<SeedReport, SeedError> {
    let registry = ServiceRegistry::new(db.clone());
    let store = JoinStore::new(db.clone());
    let mut report = SeedReport::default();

    for module in file.logic_modules {
        registry
            .upsert_logic_module(NewLogicModule {
                endpoint_name: module.endpoint_name,
                endpoint: module.endpoint,
                docs_endpoint: module.docs_endpoint,
                is_local: module.is_local,
            })
            .await?;
        report.logic_modules += 1;
    }

    for model in file.models {
        registry
            .upsert_logic_module_model(NewModel {
                model: model.model,
                logic_module_endpoint_name: model.logic_module_endpoint_name,
                endpoint: model.endpoint,
                lookup_field_name: model.lookup_field_name,
                is_local: model.is_local,
            })
            .await?;
        report.models += 1;
    }

    for rel in file.relationships {
        let origin = registry
            .find_model(&rel.origin_module, &rel.origin_model)
            .await?
            .ok_or_else(|| SeedError::UnknownModel {
                module: rel.origin_module.clone(),
                model: rel.origin_model.clone(),
                key: rel.key.clone(),
            })?;
        let related = registry
            .find_model(&rel.related_module, &rel.related_model)
            .await?
            .ok_or_else(|| SeedError::UnknownModel {
                module: rel.related_module.clone(),
                model: rel.related_model.clone(),
                key: rel.key.clone(),
            })?;
        registry
            .upsert_relationship(origin.id, related.id, &rel.key, rel.fk_field_name.as_deref())
            .await?;
        report.relationships += 1;
    }

    for join in file.joins {
        let origin = RecordPk::parse(&join.origin_pk).map_err(|err| SeedError::InvalidJoin {
            relationship: join.relationship.clone(),
            detail: err.to_string(),
        })?;
        let related = RecordPk::parse(&join.related_pk).map_err(|err| SeedError::InvalidJoin {
            relationship: join.relationship.clone(),
            detail: err.to_string(),
        })?;
        let outcome = store
            .validate_join_by_key(
                &join.relationship,
                &origin,
                &related,
                &JoinWriteCtx::for_seed(join.organization),
            )
            .await?;
        match outcome {
            JoinOutcome::Created => report.joins_created += 1,
            JoinOutcome::Existed => report.joins_existing += 1,
        }
    }

    tracing::info!(
        logic_modules = report.logic_modules,
        models = report.models,
        relationships = report.relationships,
        joins_created = report.joins_created,
        joins_existing = report.joins_existing,
        "seed file applied"
    );
    Ok(report)
}
