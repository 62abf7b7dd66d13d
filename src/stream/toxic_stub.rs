//! The stub: the runtime handle a toxic stage operates on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use rand::rngs::StdRng;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use super::{Chunk, ChunkReceiver, ChunkSender};

/// An `StdRng` shared by every stage of a link, so `--seed` makes a
/// whole run's jitter reproducible rather than per-toxic.
pub type SharedRng = Arc<AsyncMutex<StdRng>>;

/// Per-stage runtime context. Constructed fresh for every stage
/// invocation — including the re-invocation a hot-swap performs on a
/// resumed stage — and moved into the task that drives the stage.
pub struct ToxicStub {
    /// Receive-only end of the channel feeding this stage. Exposed
    /// directly (rather than behind a method) so a stage's own
    /// `tokio::select!` can race it against [`ToxicStub::interrupt`]
    /// as two disjoint field borrows.
    pub input: ChunkReceiver,

    /// Send-only end of the channel this stage feeds. `None` once
    /// [`ToxicStub::close`] has run; further sends are then abandoned.
    output: Option<ChunkSender>,

    /// Single-shot interrupt signal. A stage's wait loop must include
    /// this in every suspension point: forgetting it deadlocks the
    /// hot-swap protocol.
    pub(crate) interrupt: oneshot::Receiver<()>,

    closed: Arc<AtomicBool>,

    /// Probability (0.0-1.0) that a per-chunk toxic's effect applies to
    /// any given chunk; see [`ToxicStub::roll`].
    toxicity: f32,
    rng: SharedRng,
}

/// What a stage's task hands back when it returns.
pub(crate) enum StageExit {
    /// The stage ran its drain logic and called `close()`: the output
    /// half is gone, there is nothing left to reuse.
    Closed,
    /// The stage returned because it was interrupted before reaching
    /// end-of-stream. The stub — and critically, its `input` receiver
    /// with whatever is still queued on it — is handed back so the
    /// hot-swap can resume the chain without losing or duplicating
    /// anything in flight.
    Interrupted(ToxicStub),
}

impl ToxicStub {
    pub(crate) fn new(
        input: ChunkReceiver,
        output: ChunkSender,
        interrupt: oneshot::Receiver<()>,
        closed: Arc<AtomicBool>,
        toxicity: f32,
        rng: SharedRng,
    ) -> Self {
        Self {
            input,
            output: Some(output),
            interrupt,
            closed,
            toxicity,
            rng,
        }
    }

    /// Roll the dice for this chunk's per-chunk toxic effect. Data-
    /// shaping toxics (`latency`, `bandwidth`, `slicer`, `limit_data`)
    /// call this once per chunk and forward it unshaped when it comes
    /// back `false`. Connection-lifecycle toxics (`noop`, `timeout`,
    /// `slow_close`, `reset_peer`) don't call it: toxicity isn't
    /// meaningfully divisible over a single deadline (see DESIGN.md).
    pub async fn roll(&self) -> bool {
        if self.toxicity >= 1.0 {
            return true;
        }
        if self.toxicity <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().await;
        rng.gen::<f32>() < self.toxicity
    }

    /// Draw a uniform `f64` in `[low, high]` from the stage's shared
    /// RNG, for jitter and size-variation parameters.
    pub async fn uniform(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        let mut rng = self.rng.lock().await;
        rng.gen_range(low..=high)
    }

    /// Forward a chunk downstream. A send observing a closed stub is
    /// abandoned silently.
    pub async fn send(&mut self, chunk: Chunk) {
        self.send_inner(Some(chunk)).await;
    }

    async fn send_inner(&mut self, chunk: Option<Chunk>) {
        if let Some(output) = self.output.as_ref() {
            // An Err here means the downstream receiver is gone (its
            // stage already tore down); nothing to do but drop it.
            let _ = output.send(chunk).await;
        }
    }

    /// Drain logic is done: mark the stub closed and drop the output
    /// sender, which closes the channel for whatever stage reads it.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.output.take();
        // Propagate the sentinel to downstream readers still holding
        // a cloned sender would be wrong here — there is exactly one
        // sender per channel — dropping it is the close signal itself.
    }

    /// Whether `close()` has already run on this stub.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear a reclaimed stub back down into its raw channel endpoints,
    /// for a hot-swap to splice elsewhere in the chain. Only the
    /// `proxy` module reaches for this — everywhere else a stub is an
    /// opaque handle a toxic drives through `send`/`close`.
    pub(crate) fn into_parts(mut self) -> (ChunkReceiver, Option<ChunkSender>, f32, SharedRng) {
        (self.input, self.output.take(), self.toxicity, self.rng.clone())
    }
}

/// Spawn a stage: run `toxic` against a stub built from the given
/// channel endpoints, and hand back a [`StageHandle`] the hot-swap
/// protocol can use to interrupt it.
pub fn spawn_stage(
    toxic: Arc<dyn crate::toxics::Toxic>,
    input: ChunkReceiver,
    output: ChunkSender,
    toxicity: f32,
    rng: SharedRng,
) -> StageHandle {
    let (interrupt_tx, interrupt_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = oneshot::channel();
    let closed = Arc::new(AtomicBool::new(false));
    let mut stub = ToxicStub::new(input, output, interrupt_rx, closed, toxicity, rng);

    tokio::spawn(async move {
        toxic.pipe(&mut stub).await;
        let exit = if stub.is_closed() {
            StageExit::Closed
        } else {
            StageExit::Interrupted(stub)
        };
        // If the receiving end was dropped (the interrupting caller
        // stopped waiting), there's nothing left to report to.
        let _ = exit_tx.send(exit);
    });

    StageHandle {
        interrupt_tx: Some(interrupt_tx),
        exit_rx,
    }
}

/// Administrator-side half of the hot-swap handshake for one running
/// stage.
pub struct StageHandle {
    interrupt_tx: Option<oneshot::Sender<()>>,
    exit_rx: oneshot::Receiver<StageExit>,
}

impl StageHandle {
    /// Interrupt the stage and wait for it to exit.
    ///
    /// Returns `Some(stub)` — with its `input` receiver (and `output`
    /// sender, if still open) intact for reuse — if the stage was
    /// genuinely interrupted before reaching end-of-stream. Returns
    /// `None` if the stage had already closed (or panicked) before
    /// the interrupt could land. This check never blocks.
    pub async fn interrupt(mut self) -> Option<ToxicStub> {
        let tx = match self.interrupt_tx.take() {
            Some(tx) => tx,
            None => return None,
        };

        // oneshot::Sender::send is synchronous: it fails immediately,
        // without blocking, if the stub (and its interrupt receiver)
        // has already been dropped — i.e. the stage already exited.
        // Delivery and the closed-check happen as one atomic step,
        // never a flag read followed by a separate join.
        if tx.send(()).is_err() {
            return None;
        }

        match self.exit_rx.await {
            Ok(StageExit::Interrupted(stub)) => Some(stub),
            Ok(StageExit::Closed) | Err(_) => None,
        }
    }
}
