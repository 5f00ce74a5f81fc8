//! HTTP surface of the data-mesh gateway: auth context extraction, request
//! dispatch to backend logic modules, and the mesh orchestration pass that
//! runs after the primary response is in hand.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use http::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod request_id;
pub mod spec;
pub mod spec_cache;
pub mod web;

pub use auth::{AuthContext, SecuritySettings};
pub use client::{BackendClient, BackendRequest};
pub use config::GatewayConfig;
pub use dispatch::{DispatchOutcome, Dispatcher, LocalRequest, LocalService, MeshBackendAdapter};
pub use error::GatewayError;
pub use spec::ServiceSpec;
pub use spec_cache::SpecCache;

use datamesh::{BackendReply, MeshOrchestrator, MeshRequest, ModeFlags, RecordPk};
use dispatch::DispatchOutcome as Outcome;

/// CORS posture, sourced from the application security config.
#[derive(Debug, Clone, Default)]
pub struct CorsOptions {
    pub allow_all: bool,
    pub whitelist: Vec<String>,
}

/// Shared router state.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<MeshOrchestrator>,
    pub security: SecuritySettings,
    pub config: Arc<GatewayConfig>,
}

impl FromRef<GatewayState> for SecuritySettings {
    fn from_ref(state: &GatewayState) -> Self {
        state.security.clone()
    }
}

/// Main gateway module: owns the HTTP server and the middleware stack.
pub struct Gateway {
    // Lock-free config using arc-swap for read-mostly access
    config: ArcSwap<GatewayConfig>,
    cors: CorsOptions,
    state: GatewayState,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        cors: CorsOptions,
        dispatcher: Arc<Dispatcher>,
        orchestrator: Arc<MeshOrchestrator>,
        security: SecuritySettings,
    ) -> Self {
        let state = GatewayState {
            dispatcher,
            orchestrator,
            security,
            config: Arc::new(config.clone()),
        };
        Self {
            config: ArcSwap::from_pointee(config),
            cors,
            state,
        }
    }

    /// Get the current configuration (cheap clone from ArcSwap)
    pub fn get_cached_config(&self) -> GatewayConfig {
        (**self.config.load()).clone()
    }

    /// Build the HTTP router with the full middleware stack applied.
    pub fn build_router(&self) -> Router {
        let config = self.get_cached_config();
        let mut router = Router::new()
            .route("/health", get(web::health_check))
            .route("/healthz", get(|| async { "ok" }))
            .fallback(proxy)
            .with_state(self.state.clone());

        // Middleware order (outermost to innermost):
        // PropagateRequestId -> SetRequestId -> push_req_id_to_extensions
        // -> Trace -> Timeout -> CORS -> BodyLimit
        let x_request_id = request_id::header();

        // 1. If client sent x-request-id, propagate it; otherwise we will set it
        router = router.layer(PropagateRequestIdLayer::new(x_request_id.clone()));

        // 2. Generate x-request-id when missing
        router = router.layer(SetRequestIdLayer::new(x_request_id, request_id::MakeReqId));

        // 3. Put request_id into extensions and span
        router = router.layer(from_fn(request_id::push_req_id_to_extensions));

        // 4. Trace with request_id/status/latency
        router = router.layer({
            use tower_http::trace::TraceLayer;
            use tracing::field::Empty;

            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                    let rid = req
                        .headers()
                        .get(request_id::header())
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("n/a");
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        uri = %req.uri().path(),
                        request_id = %rid,
                        status = Empty,
                        latency_ms = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<axum::body::Body>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record("status", res.status().as_u16());
                        span.record("latency_ms", latency.as_millis() as u64);
                    },
                )
        });

        // 5. Overall request budget; exceeding it is a gateway timeout
        router = router.layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            config.request_timeout,
        ));

        // 6. CORS layer (if enabled)
        if let Some(cors) = build_cors_layer(&config, &self.cors) {
            router = router.layer(cors);
        }

        // 7. Body limit layer
        router = router.layer(RequestBodyLimitLayer::new(config.body_limit_bytes));

        router
    }

    /// Background HTTP server: bind, serve until cancelled.
    pub async fn serve(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let config = self.get_cached_config();
        let addr: SocketAddr = config
            .bind_addr
            .parse()
            .map_err(|e| anyhow!("Invalid bind address '{}': {}", config.bind_addr, e))?;
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server bound on {}", addr);

        // Graceful shutdown on cancel
        let shutdown = {
            let cancel = cancel.clone();
            async move {
                cancel.cancelled().await;
                tracing::info!("HTTP server shutting down gracefully (cancellation)");
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow!(e))
    }
}

fn build_cors_layer(config: &GatewayConfig, cors: &CorsOptions) -> Option<CorsLayer> {
    if !config.cors_enabled {
        return None;
    }
    if cors.allow_all {
        return Some(CorsLayer::permissive());
    }
    let origins: Vec<axum::http::HeaderValue> = cors
        .whitelist
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    Some(CorsLayer::new().allow_origin(AllowOrigin::list(origins)))
}

/// The catch-all proxy: route to the logic module, execute the primary
/// request, then hand the response to the mesh orchestrator when one of
/// the mesh query flags (or a DELETE) asks for it.
async fn proxy(
    State(state): State<GatewayState>,
    auth: AuthContext,
    req: axum::extract::Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_owned();
    let raw_query = parts.uri.query().unwrap_or("").to_owned();

    let flags = ModeFlags::from_query(&raw_query);
    // Mesh flags are consumed here; everything else forwards untouched.
    let forwarded_query: Vec<(String, String)> = url::form_urlencoded::parse(raw_query.as_bytes())
        .filter(|(key, _)| !matches!(key.as_ref(), "join" | "extend" | "aggregate"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| GatewayError::BadRequest(format!("unreadable request body: {err}")))?;
    let body_json = if bytes.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&bytes)
                .map_err(|err| GatewayError::BadRequest(format!("invalid JSON body: {err}")))?,
        )
    };

    let ctx = auth.call_context();
    let Outcome {
        reply,
        model,
        pk,
        module: _,
    } = state
        .dispatcher
        .dispatch(
            method.clone(),
            &path,
            &forwarded_query,
            body_json.as_ref(),
            &ctx,
        )
        .await?;

    let primary_status = reply.status;

    // Primary-path backend errors propagate verbatim, mesh processing skipped.
    if !reply.is_success() {
        return Ok(reply_response(reply));
    }

    let run_mesh = flags.any() || method == Method::DELETE;
    let (mut payload, errors, warnings) = match (run_mesh, model) {
        (true, Some(model)) => {
            let primary_pk = pk.as_deref().and_then(|raw| RecordPk::parse(raw).ok());
            let mesh = state
                .orchestrator
                .process(MeshRequest {
                    method,
                    flags,
                    body: body_json.unwrap_or(Value::Null),
                    resp_data: reply.body,
                    primary_model: model,
                    primary_pk,
                    ctx,
                })
                .await
                .map_err(GatewayError::from)?;
            (mesh.resp_data, mesh.errors, mesh.warnings)
        }
        _ => (reply.body, BTreeMap::new(), Vec::new()),
    };

    if let Value::Object(obj) = &mut payload {
        if !errors.is_empty() {
            obj.insert(
                "_mesh_errors".to_owned(),
                serde_json::to_value(&errors).unwrap_or_default(),
            );
        }
        if !warnings.is_empty() {
            obj.insert("_mesh_warnings".to_owned(), serde_json::json!(warnings));
        }
    }

    let status = StatusCode::from_u16(primary_status).unwrap_or(StatusCode::OK);
    Ok((status, Json(payload)).into_response())
}

fn reply_response(reply: BackendReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(reply.body)).into_response()
}
