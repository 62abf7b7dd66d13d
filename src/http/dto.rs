//! Request/response bodies for the admin HTTP surface.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::proxy::Proxy;

/// `POST /proxies` body.
#[derive(Debug, Deserialize)]
pub struct CreateProxyRequest {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// What the admin API hands back for a proxy.
#[derive(Debug, Serialize)]
pub struct ProxyView {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    pub enabled: bool,
}

impl From<&Arc<Proxy>> for ProxyView {
    fn from(p: &Arc<Proxy>) -> Self {
        Self {
            name: p.name.clone(),
            listen: p.listen.clone(),
            upstream: p.upstream.clone(),
            enabled: p.is_enabled(),
        }
    }
}

/// `{"error": "<message>"}` error body shared by every admin endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
