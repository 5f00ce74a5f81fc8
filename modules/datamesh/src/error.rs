use thiserror::Error;

/// Errors raised by the relationship registry, join store, and orchestrator.
#[derive(Debug, Error)]
pub enum DataMeshError {
    #[error("relationship '{0}' is not registered")]
    RelationshipNotFound(String),

    #[error("logic module '{0}' is not registered")]
    LogicModuleNotFound(String),

    #[error("relationship '{key}' is misconfigured: {reason}")]
    RelationshipMisconfigured { key: String, reason: String },

    #[error("organization scope required to create a join record")]
    OrgRequired,

    #[error("invalid primary key value: '{value}'")]
    InvalidPk { value: String },

    #[error("backend '{service}' returned {status}: {detail}")]
    BackendRejected {
        service: String,
        status: u16,
        detail: String,
    },

    #[error("backend call to '{service}' failed: {detail}")]
    BackendUnavailable { service: String, detail: String },

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl DataMeshError {
    pub fn invalid_pk(value: impl Into<String>) -> Self {
        Self::InvalidPk {
            value: value.into(),
        }
    }

    pub fn misconfigured(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RelationshipMisconfigured {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn backend_rejected(
        service: impl Into<String>,
        status: u16,
        detail: impl Into<String>,
    ) -> Self {
        Self::BackendRejected {
            service: service.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn backend_unavailable(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            service: service.into(),
            detail: detail.into(),
        }
    }
}
