//! Configuration loading for the toxic proxy engine.
//!
//! Configuration is loaded from a TOML file (default: `toxiproxy.toml`).
//! Only the static process topology lives here — the admin host/port
//! and the proxy definitions an operator wants stood up at boot. Toxic
//! state is deliberately absent: it is configured at runtime through
//! the admin HTTP surface and does not survive a restart.

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

/// Root configuration for the toxic proxy engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Admin HTTP API configuration.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Proxies to stand up at boot.
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

/// Admin HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Bind host for the admin HTTP API (default: `127.0.0.1`).
    #[serde(default = "default_admin_host")]
    pub host: String,
    /// Bind port for the admin HTTP API (default: `8474`).
    #[serde(default = "default_admin_port")]
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_admin_host(),
            port: default_admin_port(),
        }
    }
}

/// A single proxy definition to stand up at boot.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Unique proxy name.
    pub name: String,
    /// Address the proxy listens on.
    pub listen: String,
    /// Upstream address the proxy bridges accepted connections to.
    pub upstream: String,
    /// Whether the proxy starts accepting connections immediately
    /// (default: `true`).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_admin_host() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    8474
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
