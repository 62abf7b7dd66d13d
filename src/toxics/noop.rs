//! `noop`: forwards every chunk unchanged.
//!
//! The simplest possible stage implementation, and the one every chain
//! starts with at index 0 — a chain always has a sentinel noop stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::ToxicStub;
use crate::toxics::Toxic;

/// No parameters; forwards chunks as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoopToxic;

#[async_trait]
impl Toxic for NoopToxic {
    const KIND: &'static str = "noop";

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn pipe(&self, stub: &mut ToxicStub) {
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
            }
        }
    }
}
