//! Batch harvesting: the paginated cycle, its task queue, and the worker pool.

pub mod coordinator;
pub mod cursor;
pub mod queue;
pub mod scheduler;
pub mod unit;
pub mod worker;

use crate::config::{Config, CycleMode};
use crate::data::catalog::AlbumCatalog;
use crate::data::models::AlbumRef;
use crate::data::sink::HarvestStore;
use crate::partner::client::AlbumHarvester;
use coordinator::BatchCoordinator;
use queue::{Cycle, HarvestQueue, HarvestTask};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use worker::{TaskLimits, Worker, WorkerContext};

pub use coordinator::DispatchOutcome;
pub use cursor::{PageClaim, PaginationCursor};

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub page_size: u32,
    pub cycle_mode: CycleMode,
    pub rate_per_minute: u32,
    /// Tasks each worker interleaves.
    pub tasks_per_worker: usize,
    pub limits: TaskLimits,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            cycle_mode: config.cycle_mode,
            rate_per_minute: config.harvest_rate_per_minute,
            tasks_per_worker: config.tasks_per_worker,
            limits: TaskLimits {
                soft: config.task_soft_timeout,
                hard: config.task_hard_timeout,
            },
        }
    }
}

/// The coordinator, queue and shared worker state, wired together.
pub struct Pipeline {
    ctx: WorkerContext,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<dyn AlbumCatalog>,
        harvester: Arc<dyn AlbumHarvester>,
        store: Arc<dyn HarvestStore>,
        settings: PipelineSettings,
    ) -> Self {
        let queue = Arc::new(HarvestQueue::new());
        let coordinator = Arc::new(BatchCoordinator::new(
            catalog,
            queue.clone(),
            settings.page_size,
            settings.cycle_mode,
        ));
        Self {
            ctx: WorkerContext {
                queue,
                coordinator,
                harvester,
                store,
                limiter: Arc::new(worker::harvest_limiter(settings.rate_per_minute)),
                tasks_per_worker: settings.tasks_per_worker.max(1),
                limits: settings.limits,
            },
        }
    }

    pub fn coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.ctx.coordinator
    }

    pub fn queue(&self) -> &Arc<HarvestQueue> {
        &self.ctx.queue
    }

    /// Spawn `count` workers that stop when `shutdown` fires.
    pub fn spawn_workers(
        &self,
        count: usize,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|id| {
                let worker = Worker::new(id, self.ctx.clone());
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move { worker.run(shutdown_rx).await })
            })
            .collect()
    }

    /// Queue albums outside any catalog cycle, e.g. ids given on the command line.
    pub fn enqueue_albums(&self, albums: impl IntoIterator<Item = AlbumRef>) -> Arc<Cycle> {
        let cycle = Arc::new(Cycle::new());
        let mut count = 0;
        for album in albums {
            self.ctx.queue.push(HarvestTask::Album {
                album,
                cycle: cycle.clone(),
            });
            count += 1;
        }
        cycle.record_dispatched(count);
        cycle
    }

    /// Resolve once every queued task, including chained pages, has completed.
    pub async fn wait_idle(&self) {
        self.ctx.queue.wait_idle().await;
    }
}
