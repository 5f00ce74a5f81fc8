use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use datamesh::DataMeshError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no service registered for '{0}'")]
    RouteNotFound(String),

    #[error("specification for '{service}' unavailable: {reason}")]
    SpecUnavailable { service: String, reason: String },

    #[error("backend '{service}' unreachable: {reason}")]
    BackendUnreachable { service: String, reason: String },

    #[error("backend '{service}' timed out")]
    BackendTimeout { service: String },

    #[error("relationship misconfigured: {0}")]
    RelationshipMisconfigured(String),

    #[error("missing bearer token")]
    AuthMissing,

    #[error("invalid bearer token: {0}")]
    AuthInvalid(String),

    #[error("organization scope required")]
    OrgRequired,

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<DataMeshError> for GatewayError {
    fn from(err: DataMeshError) -> Self {
        match err {
            DataMeshError::OrgRequired => GatewayError::OrgRequired,
            DataMeshError::InvalidPk { value } => {
                GatewayError::BadRequest(format!("invalid primary key value: '{value}'"))
            }
            DataMeshError::LogicModuleNotFound(name) => GatewayError::RouteNotFound(name),
            DataMeshError::RelationshipNotFound(_)
            | DataMeshError::RelationshipMisconfigured { .. } => {
                GatewayError::RelationshipMisconfigured(err.to_string())
            }
            DataMeshError::BackendRejected {
                service,
                status,
                detail,
            } => GatewayError::BackendUnreachable {
                service,
                reason: format!("returned {status}: {detail}"),
            },
            DataMeshError::BackendUnavailable { service, detail } => {
                GatewayError::BackendUnreachable {
                    service,
                    reason: detail,
                }
            }
            DataMeshError::Database(db) => GatewayError::Internal(db.into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        use GatewayError::*;

        let (status, code): (StatusCode, &str) = match &self {
            RouteNotFound(_) => (StatusCode::NOT_FOUND, "route_not_found"),
            SpecUnavailable { .. } => (StatusCode::BAD_GATEWAY, "spec_unavailable"),
            BackendUnreachable { .. } => (StatusCode::BAD_GATEWAY, "backend_unreachable"),
            BackendTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "backend_timeout"),
            RelationshipMisconfigured(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "relationship_misconfigured")
            }
            AuthMissing => (StatusCode::UNAUTHORIZED, "auth_missing"),
            AuthInvalid(_) => (StatusCode::UNAUTHORIZED, "auth_invalid"),
            OrgRequired => (StatusCode::BAD_REQUEST, "org_required"),
            BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        // Internal details never leak to clients.
        let message = match &self {
            Internal(err) => {
                tracing::error!(error = %err, status = status.as_u16(), "request failed");
                "internal error".to_owned()
            }
            other => {
                tracing::warn!(error = %other, status = status.as_u16(), "request failed");
                other.to_string()
            }
        };

        let body = ErrorBody {
            code,
            message: &message,
        };
        (status, Json(body)).into_response()
    }
}
