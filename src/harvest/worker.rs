use crate::data::models::{AlbumOutcome, AlbumRef, OutcomeStatus};
use crate::data::sink::HarvestStore;
use crate::harvest::coordinator::{BatchCoordinator, DispatchOutcome};
use crate::harvest::queue::{Cycle, HarvestQueue, HarvestTask};
use crate::harvest::unit::harvest_album;
use crate::partner::client::AlbumHarvester;
use crate::utils::fmt_duration;
use futures::FutureExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::convert::Infallible;
use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tracing::{Instrument, debug, error, info, trace, warn};

/// Limiter shared by all workers: `per_minute` album tasks, spaced evenly.
pub fn harvest_limiter(per_minute: u32) -> DefaultDirectRateLimiter {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_minute(per_minute).allow_burst(NonZeroU32::MIN))
}

/// Time limits applied to each album task.
#[derive(Debug, Clone, Copy)]
pub struct TaskLimits {
    /// Past this the unit's cancellation token fires and retries stop.
    pub soft: Duration,
    /// Past this the unit is dropped and recorded as an error.
    pub hard: Duration,
}

/// Everything a worker needs, shared across the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<HarvestQueue>,
    pub coordinator: Arc<BatchCoordinator>,
    pub harvester: Arc<dyn AlbumHarvester>,
    pub store: Arc<dyn HarvestStore>,
    pub limiter: Arc<DefaultDirectRateLimiter>,
    pub tasks_per_worker: usize,
    pub limits: TaskLimits,
}

/// Marks one queued task complete when dropped, whether it finished, panicked or was aborted.
struct Completion(Arc<HarvestQueue>);

impl Drop for Completion {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// A single worker consuming the shared harvest queue, with up to
/// `tasks_per_worker` tasks in flight.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Self { id, ctx }
    }

    /// Runs the worker's main loop until shutdown or until the queue closes.
    ///
    /// In-flight tasks are aborted on shutdown.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let slots = Arc::new(Semaphore::new(self.ctx.tasks_per_worker.max(1)));
        let mut in_flight = JoinSet::new();
        info!(worker_id = self.id, slots = self.ctx.tasks_per_worker, "Worker started");

        loop {
            let slot = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = self.id, in_flight = in_flight.len(), "Worker received shutdown signal, exiting gracefully");
                    break;
                }
                slot = slots.clone().acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                }
            };

            let task = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = self.id, in_flight = in_flight.len(), "Worker received shutdown signal, exiting gracefully");
                    break;
                }
                task = self.ctx.queue.next() => match task {
                    Some(task) => task,
                    None => {
                        debug!(worker_id = self.id, "Harvest queue closed");
                        break;
                    }
                }
            };

            let done = Completion(self.ctx.queue.clone());
            let worker = self.clone();
            in_flight.spawn(async move {
                let _slot = slot;
                let _done = done;
                worker.process(task).await;
            });

            while let Some(result) = in_flight.try_join_next() {
                self.reap(result);
            }
        }

        in_flight.abort_all();
        while let Some(result) = in_flight.join_next().await {
            self.reap(result);
        }
    }

    fn reap(&self, result: Result<(), JoinError>) {
        if let Err(e) = result
            && e.is_panic()
        {
            error!(worker_id = self.id, error = ?e, "Harvest task panicked");
        }
    }

    async fn process(&self, task: HarvestTask) {
        match task {
            HarvestTask::NextPage { cycle } => {
                let span = tracing::debug_span!("dispatch", cycle_id = %cycle.id);
                let outcome = self.ctx.coordinator.dispatch(&cycle).instrument(span).await;
                trace!(worker_id = self.id, outcome = ?outcome, "Next page processed");
                if let DispatchOutcome::CycleComplete {
                    next_cycle: Some(next),
                    ..
                } = outcome
                {
                    info!(worker_id = self.id, cycle_id = %next, "Chained next harvest cycle");
                }
            }
            HarvestTask::Album { album, cycle } => {
                let span = tracing::info_span!("album", album_id = %album.album_id);
                let outcome = AssertUnwindSafe(self.process_album(&album, &cycle))
                    .catch_unwind()
                    .instrument(span)
                    .await
                    .unwrap_or_else(|_| {
                        error!(worker_id = self.id, album_id = %album.album_id, "Album task panicked");
                        AlbumOutcome::error(
                            Some(cycle.id),
                            &album.album_id,
                            "album task panicked",
                            Duration::ZERO,
                        )
                    });
                self.report(&outcome).await;
            }
        }
    }

    async fn process_album(&self, album: &AlbumRef, cycle: &Arc<Cycle>) -> AlbumOutcome {
        if cycle.is_aborted() {
            return AlbumOutcome::aborted(Some(cycle.id), &album.album_id, "cycle aborted");
        }

        tokio::select! {
            _ = self.ctx.limiter.until_ready() => {}
            _ = cycle.token().cancelled() => {
                return AlbumOutcome::aborted(Some(cycle.id), &album.album_id, "cycle aborted");
            }
        }

        let limits = self.ctx.limits;
        let start = time::Instant::now();
        let unit_cancel = cycle.token().child_token();

        let unit = harvest_album(
            self.ctx.harvester.as_ref(),
            self.ctx.store.as_ref(),
            album,
            Some(cycle),
            &unit_cancel,
        );
        let soft_limit = async {
            time::sleep(limits.soft).await;
            warn!(
                worker_id = self.id,
                album_id = %album.album_id,
                soft_limit = fmt_duration(limits.soft),
                "Album task over its soft limit, cancelling retries"
            );
            unit_cancel.cancel();
            std::future::pending::<Infallible>().await
        };
        let bounded = async {
            tokio::select! {
                outcome = unit => outcome,
                never = soft_limit => match never {},
            }
        };

        match time::timeout(limits.hard, bounded).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => AlbumOutcome::error(
                Some(cycle.id),
                &album.album_id,
                format!("album task timed out after {}", fmt_duration(limits.hard)),
                start.elapsed(),
            ),
        }
    }

    async fn report(&self, outcome: &AlbumOutcome) {
        match outcome.status {
            OutcomeStatus::Success => info!(
                worker_id = self.id,
                album_id = %outcome.album_id,
                tracks = outcome.saved.tracks_written,
                samples = outcome.saved.samples_written,
                duration = fmt_duration(outcome.duration),
                "Album harvested"
            ),
            OutcomeStatus::Error => warn!(
                worker_id = self.id,
                album_id = %outcome.album_id,
                detail = outcome.detail.as_deref().unwrap_or(""),
                duration = fmt_duration(outcome.duration),
                "Album harvest failed"
            ),
            OutcomeStatus::Aborted => debug!(
                worker_id = self.id,
                album_id = %outcome.album_id,
                "Album skipped, cycle aborted"
            ),
        }

        if let Err(e) = self.ctx.store.record_outcome(outcome).await {
            warn!(worker_id = self.id, album_id = %outcome.album_id, error = ?e, "Failed to record album outcome");
        }
    }
}
