//! The toxic collection: the source of truth for one proxy's
//! configured toxics, fanned out across every link currently open on
//! it.
//!
//! A single mutex guards the toxic list and the live link set, held
//! across the whole operation including the fan-out to every link, so
//! the set of links an administrative change reaches is exactly the
//! set observed when the change was accepted.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::CollectionError;
use crate::proxy::link::{ChainEntry, Link};
use crate::stream::SharedRng;
use crate::toxics::{Stream, Toxic, ToxicRegistry};

/// A toxic as configured on a proxy, independent of any one link.
#[derive(Clone)]
pub struct ConfiguredToxic {
    pub name: String,
    pub kind: &'static str,
    pub stream: Stream,
    pub toxicity: f32,
    pub params: serde_json::Value,
    pub toxic: Arc<dyn Toxic>,
}

/// Body of `POST /proxies/:name/toxics`.
#[derive(Debug, Deserialize)]
pub struct ToxicEnvelope {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub stream: Stream,
    #[serde(default = "default_toxicity")]
    pub toxicity: f32,
    #[serde(flatten)]
    pub attributes: serde_json::Value,
}

fn default_toxicity() -> f32 {
    1.0
}

/// Body of `POST /proxies/:name/toxics/:toxic`: partial kind-specific
/// parameters merged onto the toxic already configured under that
/// name (spec §6). Unlike [`ToxicEnvelope`], `type` and `stream` are
/// neither required nor honored — an update can change a toxic's
/// parameters and `toxicity`, never its kind or which stream it runs
/// on (the original's `UpdateToxicJson` decodes straight onto the
/// existing instance, same restriction).
#[derive(Debug, Deserialize)]
pub struct ToxicUpdate {
    pub toxicity: Option<f32>,
    #[serde(flatten)]
    pub attributes: serde_json::Value,
}

/// Shallow-merge `patch`'s object fields onto `base`, overwriting only
/// the keys `patch` actually carries so omitted parameters keep their
/// previously configured values.
fn merge_params(base: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    let mut merged = base.clone();
    if let (Some(merged_obj), Some(patch_obj)) = (merged.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            merged_obj.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// What the admin API hands back for a configured toxic.
#[derive(Debug, Serialize)]
pub struct ToxicView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub stream: Stream,
    pub toxicity: f32,
    /// This toxic's 1-based position in its stream's chain (spec §3:
    /// a contiguous prefix starting at 1, index 0 reserved for the
    /// invisible noop head). Computed from insertion order among
    /// configured toxics sharing the same `stream`, not a stored field.
    pub index: usize,
    #[serde(flatten)]
    pub attributes: serde_json::Value,
}

/// Build every configured toxic's [`ToxicView`], with `index` computed
/// as the 1-based position within its own stream's insertion order.
fn views(toxics: &[ConfiguredToxic]) -> Vec<ToxicView> {
    let mut next_index: HashMap<Stream, usize> = HashMap::new();
    toxics
        .iter()
        .map(|t| {
            let index = next_index.entry(t.stream).or_insert(1);
            let view = ToxicView {
                name: t.name.clone(),
                kind: t.kind,
                stream: t.stream,
                toxicity: t.toxicity,
                index: *index,
                attributes: t.params.clone(),
            };
            *index += 1;
            view
        })
        .collect()
}

struct LinkEntry {
    stream: Stream,
    link: Link,
}

struct Inner {
    toxics: Vec<ConfiguredToxic>,
    links: HashMap<String, LinkEntry>,
}

/// Fan a mutation out to every live link on `stream`, concurrently
/// rather than one at a time (spec §4.4/§5: "the collection issues the
/// command to every link in parallel and waits for all to complete
/// before releasing its lock"). Mirrors `Link::interrupt_from`'s
/// `tokio::spawn` + join pattern one level up: each matching link is
/// moved out of the map into its own task, mutated, and moved back once
/// every task has finished.
async fn fan_out<F, Fut>(inner: &mut Inner, stream: Stream, mut op: F)
where
    F: FnMut(Link) -> Fut,
    Fut: std::future::Future<Output = Link> + Send + 'static,
{
    let ids: Vec<String> = inner
        .links
        .iter()
        .filter(|(_, e)| e.stream == stream && !e.link.is_torn_down())
        .map(|(id, _)| id.clone())
        .collect();

    let mut joins = Vec::with_capacity(ids.len());
    for id in ids {
        let entry = inner.links.remove(&id).expect("just listed from this map");
        joins.push((id, entry.stream, tokio::spawn(op(entry.link))));
    }
    for (id, stream, join) in joins {
        if let Ok(link) = join.await {
            inner.links.insert(id, LinkEntry { stream, link });
        }
    }
}

/// Owns the configured toxics for one proxy and every link currently
/// bridging a connection through it.
pub struct ToxicCollection {
    registry: Arc<ToxicRegistry>,
    inner: Mutex<Inner>,
}

impl ToxicCollection {
    pub fn new(registry: Arc<ToxicRegistry>) -> Self {
        Self {
            registry,
            inner: Mutex::new(Inner {
                toxics: Vec::new(),
                links: HashMap::new(),
            }),
        }
    }

    /// List every configured toxic.
    pub async fn list(&self) -> Vec<ToxicView> {
        let inner = self.inner.lock().await;
        views(&inner.toxics)
    }

    /// Fetch one configured toxic by name.
    pub async fn get(&self, name: &str) -> Option<ToxicView> {
        let inner = self.inner.lock().await;
        views(&inner.toxics).into_iter().find(|v| v.name == name)
    }

    /// Configure a new toxic and append it to the tail of every live
    /// link on its stream.
    pub async fn add(&self, envelope: ToxicEnvelope) -> Result<ToxicView, CollectionError> {
        let mut inner = self.inner.lock().await;
        let name = envelope.name.clone().unwrap_or_else(|| envelope.kind.clone());

        // Resolve the kind before checking for a name collision: an
        // unknown type is rejected regardless of whether the name is
        // also taken (spec §4.5 precedence).
        let (toxic, normalized) = self.registry.build(&envelope.kind, &envelope.attributes)?;
        if inner.toxics.iter().any(|t| t.name == name) {
            return Err(CollectionError::NameTaken { name });
        }

        let configured = ConfiguredToxic {
            name: name.clone(),
            kind: toxic.kind(),
            stream: envelope.stream,
            toxicity: envelope.toxicity,
            params: normalized,
            toxic,
        };

        let fan_name = configured.name.clone();
        let fan_toxic = configured.toxic.clone();
        let fan_toxicity = configured.toxicity;
        fan_out(&mut inner, configured.stream, move |mut link: Link| {
            let name = fan_name.clone();
            let toxic = fan_toxic.clone();
            async move {
                link.add_tail(name, toxic, fan_toxicity).await;
                link
            }
        })
        .await;

        inner.toxics.push(configured);
        let view = views(&inner.toxics).into_iter().find(|v| v.name == name).expect("just pushed");
        info!(name = %name, "toxic added");
        Ok(view)
    }

    /// Merge partial parameters onto a configured toxic's existing
    /// values and apply the result in place on every live link. The
    /// toxic's kind and stream never change — only whatever fields
    /// `update` carries are overwritten; everything else keeps its
    /// previously configured value.
    pub async fn update(&self, name: &str, update: ToxicUpdate) -> Result<ToxicView, CollectionError> {
        let mut inner = self.inner.lock().await;
        let pos = inner
            .toxics
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| CollectionError::NotFound { name: name.to_string() })?;

        let existing = &inner.toxics[pos];
        let kind = existing.kind;
        let stream = existing.stream;
        let toxicity = update.toxicity.unwrap_or(existing.toxicity);
        let merged_params = merge_params(&existing.params, &update.attributes);

        let (toxic, normalized) = self.registry.build(kind, &merged_params)?;
        let configured = ConfiguredToxic {
            name: name.to_string(),
            kind: toxic.kind(),
            stream,
            toxicity,
            params: normalized,
            toxic,
        };

        let fan_name = name.to_string();
        let fan_toxic = configured.toxic.clone();
        let fan_toxicity = configured.toxicity;
        fan_out(&mut inner, stream, move |mut link: Link| {
            let name = fan_name.clone();
            let toxic = fan_toxic.clone();
            async move {
                link.update(&name, toxic, fan_toxicity).await;
                link
            }
        })
        .await;
        inner.toxics[pos] = configured;
        let view = views(&inner.toxics).into_iter().find(|v| v.name == name).expect("just replaced");
        info!(name = %name, "toxic updated");
        Ok(view)
    }

    /// Remove a configured toxic from every live link.
    pub async fn remove(&self, name: &str) -> Result<(), CollectionError> {
        let mut inner = self.inner.lock().await;
        self.remove_locked(&mut inner, name).await
    }

    async fn remove_locked(&self, inner: &mut Inner, name: &str) -> Result<(), CollectionError> {
        let pos = inner
            .toxics
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| CollectionError::NotFound { name: name.to_string() })?;
        let stream = inner.toxics[pos].stream;

        let fan_name = name.to_string();
        fan_out(inner, stream, move |mut link: Link| {
            let name = fan_name.clone();
            async move {
                link.remove(&name).await;
                link
            }
        })
        .await;
        inner.toxics.remove(pos);
        info!(name = %name, "toxic removed");
        Ok(())
    }

    /// Remove every configured toxic, restoring every live link to a
    /// bare sentinel chain.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        let names: Vec<String> = inner.toxics.iter().map(|t| t.name.clone()).collect();
        for name in names {
            let _ = self.remove_locked(&mut inner, &name).await;
        }
    }

    /// Start a new link for one direction of a freshly accepted
    /// connection, seeded with whatever toxics are currently
    /// configured on that stream.
    pub async fn start_link(
        self: &Arc<Self>,
        id: String,
        stream: Stream,
        reader: Box<dyn AsyncRead + Unpin + Send>,
        writer: Box<dyn AsyncWrite + Unpin + Send>,
        rng: SharedRng,
    ) {
        let mut inner = self.inner.lock().await;
        let entries: Vec<ChainEntry> = inner
            .toxics
            .iter()
            .filter(|t| t.stream == stream)
            .map(|t| ChainEntry {
                name: t.name.clone(),
                toxic: t.toxic.clone(),
                toxicity: t.toxicity,
            })
            .collect();

        let (link, ingress, egress) = Link::start(reader, writer, entries, rng);
        inner.links.insert(id.clone(), LinkEntry { stream, link });
        drop(inner);

        let collection = Arc::clone(self);
        let watched_id = id;
        tokio::spawn(async move {
            let _ = ingress.await;
            let _ = egress.await;
            collection.end_link(&watched_id).await;
        });
    }

    /// Tear down a link's bookkeeping once its physical tasks exit.
    pub async fn end_link(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.links.remove(id).is_some() {
            warn!(link = %id, "link ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<ToxicRegistry> {
        Arc::new(ToxicRegistry::with_defaults())
    }

    #[tokio::test]
    async fn add_then_list_round_trips() {
        let collection = ToxicCollection::new(registry());
        let envelope = ToxicEnvelope {
            name: Some("lag".into()),
            kind: "latency".into(),
            stream: Stream::Downstream,
            toxicity: 1.0,
            attributes: serde_json::json!({"latency": 100, "jitter": 10}),
        };
        collection.add(envelope).await.unwrap();

        let listed = collection.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "lag");
        assert_eq!(listed[0].kind, "latency");
        assert_eq!(listed[0].index, 1);
    }

    #[tokio::test]
    async fn index_is_per_stream_insertion_order() {
        let collection = ToxicCollection::new(registry());
        let envelope = |name: &str, stream: Stream| ToxicEnvelope {
            name: Some(name.into()),
            kind: "noop".into(),
            stream,
            toxicity: 1.0,
            attributes: serde_json::json!({}),
        };
        collection.add(envelope("up1", Stream::Upstream)).await.unwrap();
        collection.add(envelope("down1", Stream::Downstream)).await.unwrap();
        collection.add(envelope("up2", Stream::Upstream)).await.unwrap();

        let listed = collection.list().await;
        let find = |n: &str| listed.iter().find(|v| v.name == n).unwrap();
        assert_eq!(find("up1").index, 1);
        assert_eq!(find("up2").index, 2);
        assert_eq!(find("down1").index, 1);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let collection = ToxicCollection::new(registry());
        let envelope = |name: &str| ToxicEnvelope {
            name: Some(name.into()),
            kind: "noop".into(),
            stream: Stream::Upstream,
            toxicity: 1.0,
            attributes: serde_json::json!({}),
        };
        collection.add(envelope("dup")).await.unwrap();
        let err = collection.add(envelope("dup")).await.unwrap_err();
        assert!(matches!(err, CollectionError::NameTaken { .. }));
    }

    #[tokio::test]
    async fn removing_an_unknown_toxic_is_not_found() {
        let collection = ToxicCollection::new(registry());
        let err = collection.remove("ghost").await.unwrap_err();
        assert!(matches!(err, CollectionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_kind_surfaces_as_collection_error() {
        let collection = ToxicCollection::new(registry());
        let envelope = ToxicEnvelope {
            name: None,
            kind: "teleport".into(),
            stream: Stream::Upstream,
            toxicity: 1.0,
            attributes: serde_json::json!({}),
        };
        let err = collection.add(envelope).await.unwrap_err();
        assert!(matches!(err, CollectionError::UnknownKind { .. }));
    }

    #[tokio::test]
    async fn unknown_kind_wins_over_taken_name() {
        let collection = ToxicCollection::new(registry());
        let taken = ToxicEnvelope {
            name: Some("dup".into()),
            kind: "noop".into(),
            stream: Stream::Upstream,
            toxicity: 1.0,
            attributes: serde_json::json!({}),
        };
        collection.add(taken).await.unwrap();

        let conflicting = ToxicEnvelope {
            name: Some("dup".into()),
            kind: "teleport".into(),
            stream: Stream::Upstream,
            toxicity: 1.0,
            attributes: serde_json::json!({}),
        };
        let err = collection.add(conflicting).await.unwrap_err();
        assert!(matches!(err, CollectionError::UnknownKind { .. }));
    }

    #[tokio::test]
    async fn update_merges_partial_params_onto_the_existing_instance() {
        let collection = ToxicCollection::new(registry());
        collection
            .add(ToxicEnvelope {
                name: Some("lag".into()),
                kind: "latency".into(),
                stream: Stream::Downstream,
                toxicity: 1.0,
                attributes: serde_json::json!({"latency": 100, "jitter": 10}),
            })
            .await
            .unwrap();

        // Only `latency` is supplied; `jitter` should keep its
        // previously configured value rather than reset to 0.
        let view = collection
            .update(
                "lag",
                ToxicUpdate {
                    toxicity: None,
                    attributes: serde_json::json!({"latency": 300}),
                },
            )
            .await
            .unwrap();
        assert_eq!(view.attributes["latency"], 300);
        assert_eq!(view.attributes["jitter"], 10);
        assert_eq!(view.stream, Stream::Downstream);
        assert_eq!(view.toxicity, 1.0);
    }

    #[tokio::test]
    async fn update_on_an_unknown_name_is_not_found() {
        let collection = ToxicCollection::new(registry());
        let err = collection
            .update(
                "ghost",
                ToxicUpdate {
                    toxicity: None,
                    attributes: serde_json::json!({}),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::NotFound { .. }));
    }
}
