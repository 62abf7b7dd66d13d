//! `timeout`: blocks all data, closing the link after a deadline.
//!
//! Every chunk read is swallowed rather than forwarded, and the stub
//! is only closed once `timeout` has elapsed since the toxic started
//! running — or never, if `timeout` is zero, in which case the link
//! simply stalls until interrupted or the peer gives up first.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// `timeout` in milliseconds. `0` means "never" — the stall is
/// indefinite rather than timed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutToxic {
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
}

fn default_timeout_ms() -> u64 {
    0
}

impl Default for TimeoutToxic {
    fn default() -> Self {
        Self {
            timeout: default_timeout_ms(),
        }
    }
}

// A stand-in for "forever": long enough that no real test or
// deployment will observe it firing, short enough to stay well inside
// `Duration`'s range.
const FOREVER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[async_trait]
impl Toxic for TimeoutToxic {
    const KIND: &'static str = "timeout";

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn pipe(&self, stub: &mut ToxicStub) {
        let deadline = if self.timeout == 0 {
            FOREVER
        } else {
            Duration::from_millis(self.timeout)
        };
        let sleep = tokio::time::sleep(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut stub.interrupt => return,
                item = stub.input.recv() => match item {
                    // Data is deliberately never forwarded: this toxic
                    // simulates a connection that has gone silent.
                    Some(Some(_chunk)) => continue,
                    Some(None) | None => {
                        stub.close();
                        return;
                    }
                },
                _ = &mut sleep => {
                    stub.close();
                    return;
                }
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
        Arc::new(Mutex::new(StdRng::seed_from_u64(0)))
    }

    #[tokio::test]
    async fn swallows_data_until_deadline_then_closes() {
        let (tx_in, rx_in) = new_channel();
        let (tx_out, mut rx_out) = new_channel();
        let toxic = TimeoutToxic { timeout: 20 };
        let _handle = crate::stream::spawn_stage(Arc::new(toxic), rx_in, tx_out, 1.0, test_rng());

        tx_in
            .send(Some(bytes::Bytes::from_static(b"swallowed")))
            .await
            .unwrap();

        // Nothing should arrive downstream before the deadline.
        assert_eq!(rx_out.recv().await, Some(None));
        drop(tx_in);
    }

    #[tokio::test]
    async fn zero_timeout_blocks_until_interrupted() {
        let (tx_in, rx_in) = new_channel();
        let (tx_out, mut rx_out) = new_channel();
        let toxic = TimeoutToxic { timeout: 0 };
        let handle = crate::stream::spawn_stage(Arc::new(toxic), rx_in, tx_out, 1.0, test_rng());

        tx_in.send(Some(bytes::Bytes::from_static(b"x"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stub = handle.interrupt().await;
        assert!(stub.is_some());
        assert!(rx_out.try_recv().is_err());
        drop(tx_in);
    }
}
