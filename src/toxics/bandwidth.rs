//! `bandwidth`: throttles forwarding to a configured rate, in
//! kilobytes per second.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// `rate` in KB/s. `0` means unthrottled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthToxic {
    #[serde(default)]
    pub rate: u32,
}

impl Default for BandwidthToxic {
    fn default() -> Self {
        Self { rate: 0 }
    }
}

#[async_trait]
impl Toxic for BandwidthToxic {
    const KIND: &'static str = "bandwidth";

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn pipe(&self, stub: &mut ToxicStub) {
        loop {
            tokio::select! {
                _ = &mut stub.interrupt => return,
                item = stub.input.recv() => match item {
                    Some(Some(chunk)) => {
                        if self.rate > 0 && stub.roll().await {
                            let bytes_per_ms = (self.rate as f64 * 1024.0) / 1000.0;
                            let delay_ms = (chunk.len() as f64 / bytes_per_ms).round() as u64;
                            // Must race `stub.interrupt`, not sleep
                            // unconditionally, or a slow rate deadlocks
                            // the hot-swap protocol (spec §5).
                            tokio::select! {
                                _ = &mut stub.interrupt => return,
                                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                                    stub.send(chunk).await;
                                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::new_channel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn test_rng() -> crate::stream::SharedRng {
        Arc::new(Mutex::new(StdRng::seed_from_u64(3)))
    }

    #[tokio::test]
    async fn throttles_proportionally_to_chunk_size() {
        let (tx_in, rx_in) = new_channel();
        let (tx_out, mut rx_out) = new_channel();
        // 1 KB/s: a 1000-byte chunk should take roughly one second to
        // clear, so use a small chunk and a generous rate instead.
        let toxic = BandwidthToxic { rate: 1 };
        let _handle = crate::stream::spawn_stage(Arc::new(toxic), rx_in, tx_out, 1.0, test_rng());

        let start = std::time::Instant::now();
        tx_in
            .send(Some(bytes::Bytes::from(vec![0u8; 50])))
            .await
            .unwrap();
        rx_out.recv().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn zero_rate_is_unthrottled() {
        let (tx_in, rx_in) = new_channel();
        let (tx_out, mut rx_out) = new_channel();
        let toxic = BandwidthToxic { rate: 0 };
        let _handle = crate::stream::spawn_stage(Arc::new(toxic), rx_in, tx_out, 1.0, test_rng());

        let start = std::time::Instant::now();
        tx_in
            .send(Some(bytes::Bytes::from(vec![0u8; 10_000])))
            .await
            .unwrap();
        rx_out.recv().await.unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
