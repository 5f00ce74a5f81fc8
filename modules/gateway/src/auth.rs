use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::GatewayError;
use datamesh::CallContext;

/// JWT verification material, shared through the router state.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub token_secret: String,
}

/// Claims the gateway reads out of its bearer tokens. The token itself is
/// opaque pass-through material; only the tenant and user identities are
/// decoded here.
#[derive(Debug, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub organization_uuid: Option<Uuid>,
    #[serde(default)]
    pub core_user_uuid: Option<Uuid>,
    pub exp: usize,
}

/// Resolved identity of an authenticated request. Travels with the request
/// into every backend sub-call.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Raw bearer token, re-injected unchanged into sub-requests.
    pub token: String,
    pub organization_uuid: Option<Uuid>,
    pub user_uuid: Option<Uuid>,
}

impl AuthContext {
    pub fn call_context(&self) -> CallContext {
        CallContext {
            token: Some(self.token.clone()),
            organization: self.organization_uuid,
            user: self.user_uuid,
        }
    }

    pub fn from_parts(parts: &Parts, secret: &str) -> Result<Self, GatewayError> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(GatewayError::AuthMissing)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(GatewayError::AuthMissing)?;

        let decoding_key = DecodingKey::from_secret(secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|err| GatewayError::AuthInvalid(err.to_string()))?;

        Ok(Self {
            token: token.to_owned(),
            organization_uuid: token_data.claims.organization_uuid,
            user_uuid: token_data.claims.core_user_uuid,
        })
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
    SecuritySettings: FromRef<S>,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let security = SecuritySettings::from_ref(state);
        Self::from_parts(parts, &security.token_secret)
    }
}
