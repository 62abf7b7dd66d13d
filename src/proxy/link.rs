//! A link: one direction's live toxic chain for one accepted
//! connection, and the hot-swap splicing that keeps it running through
//! `add`/`update`/`remove`.
//!
//! A hot-swap pauses every stage downstream of the mutation point
//! (fanned out concurrently, joined before resuming), reshapes the
//! channels between them, and resumes — the shape every `add_tail`/
//! `update`/`remove` below shares.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::LinkGoneError;
use crate::stream::{new_channel, spawn_stage, ChunkReceiver, ChunkSender, SharedRng, StageHandle, ToxicStub};
use crate::toxics::noop::NoopToxic;
use crate::toxics::Toxic;

const READ_BUF_SIZE: usize = 16 * 1024;

/// A toxic as the collection configures it, independent of any
/// particular link's runtime state.
#[derive(Clone)]
pub struct ChainEntry {
    pub name: String,
    pub toxic: Arc<dyn Toxic>,
    pub toxicity: f32,
}

struct RunningStage {
    name: String,
    toxic: Arc<dyn Toxic>,
    toxicity: f32,
    handle: StageHandle,
}

type Reclaimed = (String, Arc<dyn Toxic>, f32, Option<ToxicStub>);

/// One direction's live chain. Stage 0 is always the noop sentinel;
/// it is never a target of `update`/`remove`.
pub struct Link {
    stages: Vec<RunningStage>,
    rng: SharedRng,
    /// Set once a reshape discovers a stage had already exited on its
    /// own (rather than being interrupted): the link is gone and
    /// further mutations on it are silently absorbed.
    torn_down: bool,
}

impl Link {
    /// Start a link: spawn the physical ingress/egress tasks plus the
    /// sentinel and `entries`, wired in order between them.
    pub fn start(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        writer: Box<dyn AsyncWrite + Unpin + Send>,
        entries: Vec<ChainEntry>,
        rng: SharedRng,
    ) -> (Self, JoinHandle<()>, JoinHandle<()>) {
        let (ingress_tx, chain_head_rx) = new_channel();
        let (chain_tail_tx, egress_rx) = new_channel();

        let ingress = tokio::spawn(run_ingress(reader, ingress_tx));
        let egress = tokio::spawn(run_egress(writer, egress_rx));

        let mut all_entries = Vec::with_capacity(entries.len() + 1);
        all_entries.push(ChainEntry {
            name: String::new(),
            toxic: Arc::new(NoopToxic) as Arc<dyn Toxic>,
            toxicity: 1.0,
        });
        all_entries.extend(entries);

        let mut stages = Vec::with_capacity(all_entries.len());
        let mut current_input = chain_head_rx;
        let last = all_entries.len() - 1;
        for (i, entry) in all_entries.into_iter().enumerate() {
            let (output, next_input) = if i == last {
                (chain_tail_tx.clone(), None)
            } else {
                let (tx, rx) = new_channel();
                (tx, Some(rx))
            };
            let handle = spawn_stage(entry.toxic.clone(), current_input, output, entry.toxicity, rng.clone());
            stages.push(RunningStage {
                name: entry.name,
                toxic: entry.toxic,
                toxicity: entry.toxicity,
                handle,
            });
            if let Some(rx) = next_input {
                current_input = rx;
            }
        }

        (
            Self {
                stages,
                rng,
                torn_down: false,
            },
            ingress,
            egress,
        )
    }

    /// Whether this link's chain has already torn itself down (a
    /// reshape observed a stage exit on its own rather than via
    /// interrupt). Collections use this to drop dead links lazily.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Interrupt stages `from..` concurrently and reclaim their stubs.
    /// Returns `None` — and marks the link torn down — the instant any
    /// one of them reports it had already closed on its own.
    async fn interrupt_from(&mut self, from: usize) -> Option<Vec<Reclaimed>> {
        if self.torn_down {
            return None;
        }
        let tail = self.stages.split_off(from);
        let mut joins = Vec::with_capacity(tail.len());
        let mut meta = Vec::with_capacity(tail.len());
        for stage in tail {
            meta.push((stage.name, stage.toxic, stage.toxicity));
            joins.push(tokio::spawn(stage.handle.interrupt()));
        }

        let mut out = Vec::with_capacity(joins.len());
        for (join, (name, toxic, toxicity)) in joins.into_iter().zip(meta.into_iter()) {
            let stub = join.await.unwrap_or(None);
            out.push((name, toxic, toxicity, stub));
        }

        if let Some((name, ..)) = out.iter().find(|(_, _, _, stub)| stub.is_none()) {
            let err = LinkGoneError(name.clone());
            warn!(error = %err, "link reshape found an already-exited stage; tearing down link");
            self.torn_down = true;
            return None;
        }
        Some(out)
    }

    /// Respawn a stage exactly as it was: same toxic, same reclaimed
    /// input/output channels.
    fn resume_unchanged(&mut self, name: String, toxic: Arc<dyn Toxic>, toxicity: f32, stub: ToxicStub) {
        let (input, output, _, rng) = stub.into_parts();
        let output = output.expect("a stage reclaimed via interrupt (not close) still owns its output");
        let handle = spawn_stage(toxic.clone(), input, output, toxicity, rng);
        self.stages.push(RunningStage {
            name,
            toxic,
            toxicity,
            handle,
        });
    }

    /// Append a toxic at the tail (`add` never inserts mid-chain).
    pub async fn add_tail(&mut self, name: String, toxic: Arc<dyn Toxic>, toxicity: f32) -> bool {
        let from = self.stages.len() - 1;
        let Some(mut reclaimed) = self.interrupt_from(from).await else {
            return false;
        };
        let (old_name, old_toxic, old_toxicity, old_stub) = reclaimed.pop().expect("interrupt_from(len-1) yields exactly one entry");
        let old_stub = old_stub.expect("checked Some above");
        let (old_input, old_output, _, old_rng) = old_stub.into_parts();
        let old_output = old_output.expect("the old tail was interrupted, not closed");

        // The old tail resumes unchanged on its input, but now writes
        // into a fresh channel feeding the newly appended toxic.
        let (mid_tx, mid_rx) = new_channel();
        let resumed = spawn_stage(old_toxic.clone(), old_input, mid_tx, old_toxicity, old_rng);
        self.stages.push(RunningStage {
            name: old_name,
            toxic: old_toxic,
            toxicity: old_toxicity,
            handle: resumed,
        });

        // The new toxic takes over the old tail's exact connection to
        // whatever is downstream (egress, unchanged) — no draining
        // needed, since nothing has been interrupted on that side.
        let new_handle = spawn_stage(toxic.clone(), mid_rx, old_output, toxicity, self.rng.clone());
        self.stages.push(RunningStage {
            name,
            toxic,
            toxicity,
            handle: new_handle,
        });
        true
    }

    /// Swap a configured toxic's implementation/parameters in place.
    pub async fn update(&mut self, target: &str, toxic: Arc<dyn Toxic>, toxicity: f32) -> bool {
        let Some(pos) = self.stages.iter().position(|s| s.name == target) else {
            return false;
        };
        if pos == 0 {
            return false; // the sentinel is never a valid target
        }
        let from = pos - 1;
        let Some(mut reclaimed) = self.interrupt_from(from).await else {
            return false;
        };
        // reclaimed[0] = predecessor, reclaimed[1] = the old toxic
        // being replaced, reclaimed[2..] = everything after it, which
        // doesn't need to change at all.
        let mut rest = reclaimed.split_off(2);
        let (pred_name, pred_toxic, pred_toxicity, pred_stub) = reclaimed.remove(0);
        let (_old_name, _old_toxic, _old_toxicity, old_stub) = reclaimed.remove(0);
        let pred_stub = pred_stub.expect("checked Some above");
        let old_stub = old_stub.expect("checked Some above");

        let (pred_input, _pred_old_output, _, pred_rng) = pred_stub.into_parts();
        let (mut leftover_rx, old_output, _, _) = old_stub.into_parts();
        let old_output = old_output.expect("the replaced toxic was interrupted, not closed");

        // Whatever the predecessor had already written but the old
        // toxic hadn't read yet must still reach the replacement, in
        // order, ahead of anything the predecessor writes from here.
        let (splice_tx, splice_rx) = new_channel();
        while let Ok(item) = leftover_rx.try_recv() {
            let _ = splice_tx.send(item).await;
        }
        drop(leftover_rx);

        let pred_handle = spawn_stage(pred_toxic.clone(), pred_input, splice_tx, pred_toxicity, pred_rng);
        self.stages.push(RunningStage {
            name: pred_name,
            toxic: pred_toxic,
            toxicity: pred_toxicity,
            handle: pred_handle,
        });

        // The replacement reuses the old toxic's exact downstream
        // connection — whoever (or whatever) is after it never notices.
        let new_handle = spawn_stage(toxic.clone(), splice_rx, old_output, toxicity, self.rng.clone());
        self.stages.push(RunningStage {
            name: target.to_string(),
            toxic,
            toxicity,
            handle: new_handle,
        });

        for (name, toxic, toxicity, stub) in rest.drain(..) {
            self.resume_unchanged(name, toxic, toxicity, stub.expect("checked Some above"));
        }
        true
    }

    /// Remove a configured toxic, splicing its neighbors together.
    /// Whatever the predecessor had already written but the removed
    /// toxic hadn't yet read is drained into the splice before either
    /// neighbor resumes — nothing lost, nothing duplicated, whether the
    /// removed toxic was interior or the current tail.
    pub async fn remove(&mut self, target: &str) -> bool {
        let Some(pos) = self.stages.iter().position(|s| s.name == target) else {
            return false;
        };
        if pos == 0 {
            return false;
        }
        let from = pos - 1;
        let Some(mut reclaimed) = self.interrupt_from(from).await else {
            return false;
        };
        let mut rest = reclaimed.split_off(2.min(reclaimed.len()));
        let (pred_name, pred_toxic, pred_toxicity, pred_stub) = reclaimed.remove(0);
        let (_removed_name, _removed_toxic, _removed_toxicity, removed_stub) = reclaimed.remove(0);
        let pred_stub = pred_stub.expect("checked Some above");
        let removed_stub = removed_stub.expect("checked Some above");

        let (pred_input, _pred_old_output, _, pred_rng) = pred_stub.into_parts();
        let (mut gap_rx, gap_output, _, _) = removed_stub.into_parts();
        let gap_output = gap_output.expect("the removed toxic was interrupted, not closed");

        if rest.is_empty() {
            // The removed toxic was the tail: the predecessor takes
            // over its exact connection downstream (egress, which
            // never stopped reading it). Whatever the predecessor had
            // already written but the removed toxic hadn't read yet
            // must reach that downstream connection first, in order,
            // ahead of anything the predecessor writes from here.
            while let Ok(item) = gap_rx.try_recv() {
                let _ = gap_output.send(item).await;
            }
            drop(gap_rx);
            let pred_handle = spawn_stage(pred_toxic.clone(), pred_input, gap_output, pred_toxicity, pred_rng);
            self.stages.push(RunningStage {
                name: pred_name,
                toxic: pred_toxic,
                toxicity: pred_toxicity,
                handle: pred_handle,
            });
            return true;
        }

        let (succ_name, succ_toxic, succ_toxicity, succ_stub) = rest.remove(0);
        let succ_stub = succ_stub.expect("checked Some above");
        let (mut succ_old_input, succ_old_output, _, succ_rng) = succ_stub.into_parts();
        let succ_old_output = succ_old_output.expect("the successor was interrupted, not closed");

        // Order: whatever the removed toxic already emitted (now
        // sitting unread in the successor's old input) predates
        // whatever the predecessor had already written but the
        // removed toxic hadn't read yet. Buffer both into a plain
        // Vec first — up to two full channels' worth of items can be
        // queued here, more than the splice channel's own capacity,
        // so pushing them straight into it with no reader yet could
        // block forever on a full upstream and wedge the collection
        // mutex. Buffering costs no ordering: nothing else touches
        // `splice_tx` until the predecessor is resumed below.
        let mut pending = Vec::new();
        while let Ok(item) = succ_old_input.try_recv() {
            pending.push(item);
        }
        drop(succ_old_input);
        let _ = gap_output; // the removed toxic's output end is discarded
        while let Ok(item) = gap_rx.try_recv() {
            pending.push(item);
        }
        drop(gap_rx);

        let (splice_tx, splice_rx) = new_channel();
        // Spawn the successor first so there is already a live reader
        // on `splice_rx` before anything is sent into `splice_tx`.
        let succ_handle = spawn_stage(succ_toxic.clone(), splice_rx, succ_old_output, succ_toxicity, succ_rng);
        self.stages.push(RunningStage {
            name: succ_name,
            toxic: succ_toxic,
            toxicity: succ_toxicity,
            handle: succ_handle,
        });
        for item in pending {
            let _ = splice_tx.send(item).await;
        }

        let pred_handle = spawn_stage(pred_toxic.clone(), pred_input, splice_tx, pred_toxicity, pred_rng);
        self.stages.push(RunningStage {
            name: pred_name,
            toxic: pred_toxic,
            toxicity: pred_toxicity,
            handle: pred_handle,
        });

        for (name, toxic, toxicity, stub) in rest.drain(..) {
            self.resume_unchanged(name, toxic, toxicity, stub.expect("checked Some above"));
        }
        true
    }
}

async fn run_ingress(mut reader: Box<dyn AsyncRead + Unpin + Send>, tx: ChunkSender) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("ingress reached EOF");
                let _ = tx.send(None).await;
                return;
            }
            Ok(n) => {
                let chunk = bytes::Bytes::copy_from_slice(&buf[..n]);
                if tx.send(Some(chunk)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "ingress read failed, treating as EOF");
                let _ = tx.send(None).await;
                return;
            }
        }
    }
}

async fn run_egress(mut writer: Box<dyn AsyncWrite + Unpin + Send>, mut rx: ChunkReceiver) {
    loop {
        match rx.recv().await {
            Some(Some(chunk)) => {
                if writer.write_all(&chunk).await.is_err() {
                    return;
                }
            }
            Some(None) | None => {
                let _ = writer.shutdown().await;
                return;
            }
        }
    }
}
