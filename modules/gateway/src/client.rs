//! Spec-driven backend HTTP execution with the caller's credentials
//! injected and a span per outgoing call.

use std::time::Duration;

use http::Method;
use serde_json::Value;
use tracing::{Instrument, Level};

use crate::error::GatewayError;
use crate::spec::ServiceSpec;
use datamesh::{BackendReply, CallContext};

/// One backend operation, already resolved to a concrete sub-path.
pub struct BackendRequest<'a> {
    pub method: Method,
    /// Path under the service base, e.g. `/product/` or `/product/u1/`.
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub body: Option<&'a Value>,
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Execute one backend call.
    ///
    /// Any completed HTTP exchange is `Ok`, 4xx/5xx included; those bodies
    /// pass through verbatim and are never retried. Transport failures map
    /// to 502, exceeding the per-call budget to 504.
    pub async fn request(
        &self,
        spec: &ServiceSpec,
        req: BackendRequest<'_>,
        ctx: &CallContext,
    ) -> Result<BackendReply, GatewayError> {
        if spec.resolve(req.path, &req.method).is_none() {
            return Err(GatewayError::RouteNotFound(format!(
                "{} {}{}",
                req.method, spec.endpoint_name, req.path
            )));
        }

        let url = spec
            .url_for(req.path)
            .map_err(|err| GatewayError::Internal(err.into()))?;

        let mut builder = self
            .http
            .request(req.method.clone(), url.clone())
            .timeout(self.timeout);
        if !req.query.is_empty() {
            builder = builder.query(req.query);
        }
        if let Some(token) = &ctx.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(org) = ctx.organization {
            builder = builder.header("X-Forwarded-Org", org.to_string());
        }
        if req.method != Method::GET {
            if let Some(body) = req.body {
                builder = builder.json(body);
            }
        }

        let span = tracing::span!(
            Level::INFO, "outgoing_http",
            http.method = %req.method,
            http.url = %url,
            http.status_code = tracing::field::Empty,
        );
        let service = spec.endpoint_name.clone();

        async move {
            let response = builder.send().await.map_err(|err| {
                if err.is_timeout() {
                    GatewayError::BackendTimeout {
                        service: service.clone(),
                    }
                } else {
                    GatewayError::BackendUnreachable {
                        service: service.clone(),
                        reason: err.to_string(),
                    }
                }
            })?;

            let status = response.status().as_u16();
            tracing::Span::current().record("http.status_code", status);

            let bytes =
                response
                    .bytes()
                    .await
                    .map_err(|err| GatewayError::BackendUnreachable {
                        service: service.clone(),
                        reason: err.to_string(),
                    })?;

            // Bodies pass through verbatim; non-JSON payloads are preserved
            // as strings so error pages survive the round trip.
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                })
            };

            Ok(BackendReply { status, body })
        }
        .instrument(span)
        .await
    }
}
