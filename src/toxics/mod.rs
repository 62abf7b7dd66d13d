//! The toxic catalog and registry.
//!
//! A [`Toxic`] is a stateless recipe — its configured parameters plus
//! a `pipe` coroutine — that a [`crate::stream::ToxicStub`] runs as one
//! stage of a link. [`ToxicRegistry`] is the two-phase decoder: given a
//! `type` name and a JSON blob, it resolves the concrete toxic type and
//! deserializes the blob into it.

pub mod bandwidth;
pub mod latency;
pub mod limit_data;
pub mod noop;
pub mod reset_peer;
pub mod slicer;
pub mod slow_close;
pub mod timeout;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CollectionError;
use crate::stream::ToxicStub;

/// Which of a proxy's two directional links a toxic attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    /// Client -> upstream.
    Upstream,
    /// Upstream -> client.
    Downstream,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Upstream => write!(f, "upstream"),
            Stream::Downstream => write!(f, "downstream"),
        }
    }
}

/// One stage's recipe: parameters plus the coroutine that runs them
/// against a stub.
///
/// Implementors must be stateless with respect to a single run — any
/// per-chunk bookkeeping (e.g. `limit_data`'s running byte count) lives
/// in a local inside `pipe`, never in `&self`, because the *same*
/// `Arc<dyn Toxic>` is reused verbatim across a hot-swap's stop/start
/// of a stage (only the stub is rebuilt).
#[async_trait]
pub trait Toxic: Send + Sync + fmt::Debug {
    /// The `type` name this toxic answers to in the admin API and in
    /// [`ToxicRegistry::register`].
    const KIND: &'static str
    where
        Self: Sized;

    /// Same value as [`Toxic::KIND`], available through the trait
    /// object for listing/serializing a configured toxic.
    fn kind(&self) -> &'static str;

    /// Run this toxic's effect against one stage of a link until the
    /// stub is interrupted or reaches end-of-stream.
    async fn pipe(&self, stub: &mut ToxicStub);
}

type Factory = fn(&serde_json::Value) -> Result<(Arc<dyn Toxic>, serde_json::Value), serde_json::Error>;

/// Resolves a `type` name to a concrete [`Toxic`] implementation and
/// decodes its parameters in two phases: the registered factory owns
/// the concrete `Deserialize` impl, so the registry itself never needs
/// to know the field shape of any one toxic.
pub struct ToxicRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl ToxicRegistry {
    /// An empty registry with nothing registered.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The catalog this crate ships: `noop`, `timeout`, and
    /// `slow_close`, plus `latency`, `bandwidth`, `slicer`,
    /// `limit_data`, and `reset_peer`.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register::<noop::NoopToxic>();
        reg.register::<timeout::TimeoutToxic>();
        reg.register::<slow_close::SlowCloseToxic>();
        reg.register::<latency::LatencyToxic>();
        reg.register::<bandwidth::BandwidthToxic>();
        reg.register::<slicer::SlicerToxic>();
        reg.register::<limit_data::LimitDataToxic>();
        reg.register::<reset_peer::ResetPeerToxic>();
        reg
    }

    /// Register a toxic kind. `T` must round-trip through JSON (its
    /// `Deserialize` impl supplies its own field defaults) and must be
    /// constructible with `Default` so an empty `{}` body is valid.
    pub fn register<T>(&mut self)
    where
        T: Toxic + DeserializeOwned + Default + 'static,
    {
        self.factories.insert(T::KIND, |value| {
            let parsed: T = serde_json::from_value(value.clone())?;
            let echo = serde_json::to_value(&parsed).unwrap_or_else(|_| value.clone());
            Ok((Arc::new(parsed) as Arc<dyn Toxic>, echo))
        });
    }

    /// Build a toxic instance from its `type` name and parameter blob.
    /// Returns the instance plus the normalized parameter JSON (with
    /// defaults filled in) for echoing back to the admin caller.
    pub fn build(
        &self,
        kind: &str,
        params: &serde_json::Value,
    ) -> Result<(Arc<dyn Toxic>, serde_json::Value), CollectionError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| CollectionError::UnknownKind {
                type_name: kind.to_string(),
            })?;
        factory(params).map_err(|e| CollectionError::DecodeError {
            reason: e.to_string(),
        })
    }

    /// Whether a kind is registered; used by the admin API to reject
    /// unknown `type`s before attempting the full decode (so a typo
    /// gets `UnknownKind` rather than a confusing `DecodeError`).
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Number of registered toxic kinds (spec §4.1 `count()`).
    pub fn count(&self) -> usize {
        self.factories.len()
    }
}

impl Default for ToxicRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_rejected() {
        let reg = ToxicRegistry::with_defaults();
        let err = reg.build("teleport", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, CollectionError::UnknownKind { .. }));
    }

    #[test]
    fn noop_builds_from_empty_object() {
        let reg = ToxicRegistry::with_defaults();
        let (toxic, _) = reg.build("noop", &serde_json::json!({})).unwrap();
        assert_eq!(toxic.kind(), "noop");
    }

    #[test]
    fn bad_params_are_a_decode_error() {
        let reg = ToxicRegistry::with_defaults();
        let err = reg
            .build("latency", &serde_json::json!({"latency": "not a number"}))
            .unwrap_err();
        assert!(matches!(err, CollectionError::DecodeError { .. }));
    }

    #[test]
    fn count_reflects_the_registered_catalog() {
        let reg = ToxicRegistry::with_defaults();
        assert_eq!(reg.count(), 8);
        assert_eq!(ToxicRegistry::new().count(), 0);
    }
}
