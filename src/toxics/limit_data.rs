//! `limit_data`: forwards up to a cumulative byte budget, then closes
//! the link.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// Cumulative byte budget. `0` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitDataToxic {
    #[serde(default)]
    pub bytes: u64,
}

impl Default for LimitDataToxic {
    fn default() -> Self {
        Self { bytes: 0 }
    }
}

#[async_trait]
impl Toxic for LimitDataToxic {
    const KIND: &'static str = "limit_data";

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn pipe(&self, stub: &mut ToxicStub) {
        // Running total lives here, not on `self`: the same
        // `Arc<LimitDataToxic>` is reused verbatim across a hot-swap
        // restart, but each run of `pipe` gets a fresh budget.
        let mut sent: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut stub.interrupt => return,
                item = stub.input.recv() => match item {
                    Some(Some(chunk)) => {
                        if self.bytes == 0 {
                            stub.send(chunk).await;
                            continue;
                        }
                        let remaining = self.bytes.saturating_sub(sent);
                        let allowed = (chunk.len() as u64).min(remaining) as usize;
                        sent += allowed as u64;
                        if allowed > 0 {
                            stub.send(chunk.slice(0..allowed)).await;
                        }
                        if sent >= self.bytes {
                            // Budget exhausted, whether this chunk
                            // landed exactly on the boundary or ran
                            // over it: close rather than draining.
                            stub.close();
                            return;
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
