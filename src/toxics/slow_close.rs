//! `slow_close`: forwards data faithfully, but delays tearing down the
//! link after the source closes.
//!
//! Behaves exactly like `noop` while data is flowing, then — once it
//! observes the end-of-stream sentinel — waits `delay` before calling
//! `close()`, simulating a peer that lingers before tearing down its
//! half of the connection.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// `delay` in milliseconds before closing after end-of-stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowCloseToxic {
    #[serde(default = "default_delay_ms")]
    pub delay: u64,
}

fn default_delay_ms() -> u64 {
    0
}

impl Default for SlowCloseToxic {
    fn default() -> Self {
        Self {
            delay: default_delay_ms(),
        }
    }
}

#[async_trait]
impl Toxic for SlowCloseToxic {
    const KIND: &'static str = "slow_close";

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn pipe(&self, stub: &mut ToxicStub) {
        loop {
            tokio::select! {
                _ = &mut stub.interrupt => return,
                item = stub.input.recv() => match item {
                    Some(Some(chunk)) => stub.send(chunk).await,
                    Some(None) | None => break,
                },
            }
        }

        // Upstream is done; linger before tearing our half down.
        tokio::select! {
            _ = &mut stub.interrupt => return,
            _ = tokio::time::sleep(Duration::from_millis(self.delay)) => {
                stub.close();
            }
        }
    }
}
