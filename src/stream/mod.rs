//! The per-stage channel plumbing a toxic chain runs on.
//!
//! A [`Chunk`] is the unit of data flowing between stages. `None` on a
//! channel is the end-of-stream sentinel: it is never forwarded as
//! data, only consumed to trigger a stage's graceful-close path.

mod toxic_stub;

pub use toxic_stub::{spawn_stage, SharedRng, StageHandle, ToxicStub};

use bytes::Bytes;
use tokio::sync::mpsc;

/// A framed unit of bytes traveling through one direction's pipeline.
pub type Chunk = Bytes;

/// Sending half of an inter-stage channel. `None` signals clean EOF.
pub type ChunkSender = mpsc::Sender<Option<Chunk>>;

/// Receiving half of an inter-stage channel.
pub type ChunkReceiver = mpsc::Receiver<Option<Chunk>>;

/// Channel capacity between adjacent stages. Bounded so a slow or
/// stalled stage (e.g. `timeout` with `timeout_ms == 0`) applies
/// backpressure to its producer rather than buffering unboundedly.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Build a fresh inter-stage channel.
pub fn new_channel() -> (ChunkSender, ChunkReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}
