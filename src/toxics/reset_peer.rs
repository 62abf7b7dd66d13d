//! `reset_peer`: like `timeout`, but tears down abruptly rather than
//! via a clean drain — whatever is queued is dropped, modeling a timed
//! TCP RST rather than a graceful half-close.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// `timeout` in milliseconds before the abrupt reset fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetPeerToxic {
    #[serde(default)]
    pub timeout: u64,
}

impl Default for ResetPeerToxic {
    fn default() -> Self {
        Self { timeout: 0 }
    }
}

#[async_trait]
impl Toxic for ResetPeerToxic {
    const KIND: &'static str = "reset_peer";

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn pipe(&self, stub: &mut ToxicStub) {
        let sleep = tokio::time::sleep(Duration::from_millis(self.timeout));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut stub.interrupt => return,
                item = stub.input.recv() => match item {
                    Some(Some(chunk)) => stub.send(chunk).await,
                    Some(None) | None => {
                        stub.close();
                        return;
                    }
                },
                _ = &mut sleep => {
                    // Abrupt reset: whatever is still queued on
                    // `input` is dropped rather than drained.
                    stub.close();
                    return;
                }
            }
        }
    }
}
