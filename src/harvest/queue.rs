//! The FIFO task queue shared by all harvest workers.

use crate::data::models::AlbumRef;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use ulid::Ulid;

/// One full pass over the catalog.
#[derive(Debug)]
pub struct Cycle {
    pub id: Ulid,
    cancel: CancellationToken,
    albums_dispatched: AtomicUsize,
}

impl Cycle {
    pub fn new() -> Self {
        Self {
            id: Ulid::new(),
            cancel: CancellationToken::new(),
            albums_dispatched: AtomicUsize::new(0),
        }
    }

    /// Stop the cycle: queued albums are skipped and the chain ends at its next page.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fires when the cycle is aborted.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn record_dispatched(&self, count: usize) {
        self.albums_dispatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn albums_dispatched(&self) -> usize {
        self.albums_dispatched.load(Ordering::Relaxed)
    }
}

impl Default for Cycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum HarvestTask {
    /// Fetch and persist one album.
    Album { album: AlbumRef, cycle: Arc<Cycle> },
    /// Claim and dispatch the cycle's next page.
    NextPage { cycle: Arc<Cycle> },
}

impl HarvestTask {
    pub fn cycle(&self) -> &Arc<Cycle> {
        match self {
            Self::Album { cycle, .. } | Self::NextPage { cycle } => cycle,
        }
    }
}

/// Unbounded FIFO consumed by every worker, with a count of tasks not yet completed.
///
/// A task counts as pending from `push` until the worker that took it calls `complete`.
pub struct HarvestQueue {
    tx: mpsc::UnboundedSender<HarvestTask>,
    rx: Mutex<mpsc::UnboundedReceiver<HarvestTask>>,
    pending: watch::Sender<usize>,
}

impl HarvestQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        Self {
            tx,
            rx: Mutex::new(rx),
            pending,
        }
    }

    pub fn push(&self, task: HarvestTask) {
        self.pending.send_modify(|n| *n += 1);
        if self.tx.send(task).is_err() {
            warn!("Harvest queue receiver dropped, task discarded");
            self.complete();
        }
    }

    /// Wait for the next task. Cancel-safe: dropping the future loses nothing.
    pub async fn next(&self) -> Option<HarvestTask> {
        self.rx.lock().await.recv().await
    }

    pub fn complete(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolve once every pushed task has completed.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for HarvestQueue {
    fn default() -> Self {
        Self::new()
    }
}
