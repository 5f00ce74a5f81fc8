use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Gateway module configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub cors_enabled: bool,
    /// How long a cached OpenAPI document stays fresh.
    #[serde(with = "humantime_serde", default = "default_spec_ttl")]
    pub spec_ttl: Duration,
    /// Budget per backend call.
    #[serde(with = "humantime_serde", default = "default_backend_timeout")]
    pub backend_timeout: Duration,
    /// Overall budget per inbound request.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_spec_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_body_limit() -> usize {
    16 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            cors_enabled: false,
            spec_ttl: default_spec_ttl(),
            backend_timeout: default_backend_timeout(),
            request_timeout: default_request_timeout(),
            body_limit_bytes: default_body_limit(),
        }
    }
}
