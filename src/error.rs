//! Error types for the toxic chain engine.

use std::path::PathBuf;

/// Errors surfaced by [`crate::toxics::ToxicRegistry`] and
/// [`crate::proxy::collection::ToxicCollection`] configuration operations.
///
/// These map directly onto the admin HTTP surface's status codes
/// (see `crate::http`): `UnknownKind`/`DecodeError` -> 400, `NameTaken`
/// -> 409, `NotFound` -> 404.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// `type` on the envelope does not match any registered toxic kind.
    #[error("toxic type not found: '{type_name}'")]
    UnknownKind {
        /// The unrecognized type name.
        type_name: String,
    },

    /// The configuration blob could not be decoded into the toxic's
    /// parameter record.
    #[error("couldn't decode toxic JSON: {reason}")]
    DecodeError {
        /// Human-readable decode failure reason.
        reason: String,
    },

    /// `add` was called with a name that is already configured.
    #[error("toxic with same name already exists: '{name}'")]
    NameTaken {
        /// The name that was already taken.
        name: String,
    },

    /// `update`/`remove` targeted a name that is not configured.
    #[error("toxic not found: '{name}'")]
    NotFound {
        /// The name that was not found.
        name: String,
    },
}

/// Internal error: a hot-swap command targeted a link that has already
/// torn down. Never surfaced to the admin caller — absorbed silently
/// by the collection.
#[derive(Debug, thiserror::Error)]
#[error("link gone: {0}")]
pub struct LinkGoneError(pub String);

/// Errors from loading the proxy configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

/// Errors from proxy lifecycle operations (bind, duplicate name, etc.).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// A proxy with this name is already registered.
    #[error("proxy already exists: '{0}'")]
    AlreadyExists(String),

    /// No proxy with this name is registered.
    #[error("proxy not found: '{0}'")]
    NotFound(String),

    /// Failed to bind the proxy's listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to connect to the proxy's upstream address.
    #[error("failed to dial upstream {addr}: {source}")]
    Dial {
        /// The upstream address that could not be reached.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A toxic-collection operation failed.
    #[error(transparent)]
    Collection(#[from] CollectionError),
}
