//! `slicer`: splits each chunk into several smaller writes, each
//! `average_size ± size_variation` bytes, spaced `delay` microseconds
//! apart.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// `average_size`/`size_variation` in bytes, `delay` in microseconds
/// between consecutive slices of the same chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicerToxic {
    #[serde(default = "default_average_size")]
    pub average_size: u32,
    #[serde(default)]
    pub size_variation: u32,
    #[serde(default)]
    pub delay: u32,
}

fn default_average_size() -> u32 {
    512
}

impl Default for SlicerToxic {
    fn default() -> Self {
        Self {
            average_size: default_average_size(),
            size_variation: 0,
            delay: 0,
        }
    }
}

#[async_trait]
impl Toxic for SlicerToxic {
    const KIND: &'static str = "slicer";

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn pipe(&self, stub: &mut ToxicStub) {
        loop {
            tokio::select! {
                _ = &mut stub.interrupt => return,
                item = stub.input.recv() => match item {
                    Some(Some(chunk)) => {
                        if stub.roll().await {
                            if !self.slice_and_send(stub, chunk).await {
                                return;
                            }
                        } else {
                            stub.send(chunk).await;
                        }
                    }
                    Some(None) | None => {
                        stub.close();
                        return;
                    }
                },
            }
        }
    }
}

impl SlicerToxic {
    /// Slice `chunk` into writes spaced `delay` microseconds apart.
    /// Returns `false` if interrupted mid-slice (the stub is handed
    /// back to the hot-swap protocol; any slices not yet sent are
    /// dropped, same accepted limitation as `latency`'s in-flight
    /// delay — see DESIGN.md), `true` once every slice has been sent.
    async fn slice_and_send(&self, stub: &mut ToxicStub, chunk: crate::stream::Chunk) -> bool {
        let mut offset = 0;
        let total = chunk.len();
        let variation = self.size_variation as f64;
        let mut first = true;
        while offset < total {
            if !first && self.delay > 0 {
                // Must race `stub.interrupt`, not sleep
                // unconditionally, or a slow slicer deadlocks the
                // hot-swap protocol (spec §5).
                tokio::select! {
                    _ = &mut stub.interrupt => return false,
                    _ = tokio::time::sleep(Duration::from_micros(self.delay as u64)) => {}
                }
            }
            first = false;

            let jitter = if variation > 0.0 {
                stub.uniform(-variation, variation).await
            } else {
                0.0
            };
            let size = ((self.average_size as f64 + jitter).max(1.0)) as usize;
            let end = (offset + size).min(total);
            stub.send(chunk.slice(offset..end)).await;
            offset = end;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::new_channel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn test_rng() -> crate::stream::SharedRng {
        Arc::new(Mutex::new(StdRng::seed_from_u64(2)))
    }

    #[tokio::test]
    async fn splits_a_chunk_into_multiple_slices() {
        let (tx_in, rx_in) = new_channel();
        let (tx_out, mut rx_out) = new_channel();
        let toxic = SlicerToxic {
            average_size: 4,
            size_variation: 0,
            delay: 0,
        };
        let _handle = crate::stream::spawn_stage(Arc::new(toxic), rx_in, tx_out, 1.0, test_rng());

        tx_in
            .send(Some(bytes::Bytes::from_static(b"0123456789")))
            .await
            .unwrap();

        let mut reassembled = Vec::new();
        let mut slices = 0;
        loop {
            let chunk = rx_out.recv().await.unwrap();
            match chunk {
                Some(bytes) => {
                    slices += 1;
                    reassembled.extend_from_slice(&bytes);
                }
                None => unreachable!("no EOF expected mid-test"),
            }
            if reassembled.len() == 10 {
                break;
            }
        }
        assert!(slices >= 2);
        assert_eq!(reassembled, b"0123456789");
    }
}
