//! `latency`: delays each chunk by `latency ± jitter` milliseconds.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// `latency`/`jitter` in milliseconds. Each chunk is delayed by
/// `latency + uniform(-jitter, jitter)`, floored at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyToxic {
    #[serde(default)]
    pub latency: u64,
    #[serde(default)]
    pub jitter: u64,
}

impl Default for LatencyToxic {
    fn default() -> Self {
        Self {
            latency: 0,
            jitter: 0,
        }
    }
}

#[async_trait]
impl Toxic for LatencyToxic {
    const KIND: &'static str = "latency";

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
                            let jitter = if self.jitter > 0 {
                                stub.uniform(-(self.jitter as f64), self.jitter as f64).await
                            } else {
                                0.0
                            };
                            let delay_ms = (self.latency as f64 + jitter).max(0.0) as u64;
                            // An interrupt mid-delay returns promptly,
                            // dropping this one in-flight chunk rather
                            // than handing it back (see DESIGN.md's
                            // accepted-limitation note) — it must still
                            // race `stub.interrupt` or it deadlocks the
                            // hot-swap protocol (spec §5).
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
