//! Parsed view of a backend's OpenAPI document.
//!
//! The gateway only needs operation discovery by (path, method) and the
//! base URL; resource PK fields come from the registry, not the spec.

use std::collections::{BTreeMap, BTreeSet};

use http::Method;
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unsupported or malformed OpenAPI document: {0}")]
    InvalidDocument(String),

    #[error("invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// One logic module's HTTP surface, distilled from its OpenAPI 2 or 3
/// document.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub endpoint_name: String,
    base_url: Url,
    /// Path template → lowercase methods it serves.
    paths: BTreeMap<String, BTreeSet<String>>,
}

fn is_http_method(key: &str) -> bool {
    matches!(
        key,
        "get" | "put" | "post" | "delete" | "patch" | "head" | "options"
    )
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn template_matches(template: &str, concrete: &[&str]) -> bool {
    let template = segments(template);
    template.len() == concrete.len()
        && template
            .iter()
            .zip(concrete)
            .all(|(t, c)| (t.starts_with('{') && t.ends_with('}')) || t == c)
}

impl ServiceSpec {
    pub fn parse(
        endpoint_name: &str,
        service_endpoint: &str,
        document: &Value,
    ) -> Result<Self, SpecError> {
        let root = document
            .as_object()
            .ok_or_else(|| SpecError::InvalidDocument("document root is not an object".into()))?;

        // Swagger 2 keeps the path prefix in `basePath`; OpenAPI 3 folds it
        // into the first server URL.
        let base_path = if root.contains_key("swagger") {
            root.get("basePath")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned()
        } else if root.contains_key("openapi") {
            root.get("servers")
                .and_then(Value::as_array)
                .and_then(|servers| servers.first())
                .and_then(|server| server.get("url"))
                .and_then(Value::as_str)
                .map(|raw| match Url::parse(raw) {
                    Ok(url) => url.path().to_owned(),
                    // relative server URLs are already just a path
                    Err(_) => raw.to_owned(),
                })
                .unwrap_or_default()
        } else {
            return Err(SpecError::InvalidDocument(
                "neither 'swagger' nor 'openapi' version marker present".into(),
            ));
        };

        let path_items = root
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| SpecError::InvalidDocument("'paths' object missing".into()))?;

        let mut paths = BTreeMap::new();
        for (path, item) in path_items {
            let methods: BTreeSet<String> = item
                .as_object()
                .map(|ops| {
                    ops.keys()
                        .filter(|key| is_http_method(key.as_str()))
                        .map(|key| key.to_ascii_lowercase())
                        .collect()
                })
                .unwrap_or_default();
            paths.insert(path.clone(), methods);
        }

        let base_path = base_path.trim_end_matches('/');
        let base_url = Url::parse(&format!(
            "{}{}",
            service_endpoint.trim_end_matches('/'),
            base_path
        ))?;

        Ok(Self {
            endpoint_name: endpoint_name.to_owned(),
            base_url,
            paths,
        })
    }

    /// Find the operation serving (path, method); `{param}` template
    /// segments match any concrete value. Returns the matched template.
    pub fn resolve(&self, path: &str, method: &Method) -> Option<&str> {
        let method = method.as_str().to_ascii_lowercase();
        let concrete = segments(path);
        self.paths.iter().find_map(|(template, methods)| {
            (methods.contains(&method) && template_matches(template, &concrete))
                .then_some(template.as_str())
        })
    }

    /// Absolute URL for a concrete request path under this service.
    pub fn url_for(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}
