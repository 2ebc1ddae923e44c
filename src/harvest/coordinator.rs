//! Pagination over the catalog and fan-out of album tasks.

use crate::config::CycleMode;
use crate::data::catalog::AlbumCatalog;
use crate::harvest::cursor::PaginationCursor;
use crate::harvest::queue::{Cycle, HarvestQueue, HarvestTask};
use crate::utils::Stopwatch;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

const SLOW_PAGE_THRESHOLD: Duration = Duration::from_millis(500);

/// What one next-page task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Albums from the page at `offset` were queued, followed by the next page task.
    Dispatched { offset: i64, albums: usize },
    /// The catalog is exhausted; the cursor is back at zero.
    CycleComplete {
        cycle_id: Ulid,
        albums: usize,
        /// The cycle chained in continuous mode.
        next_cycle: Option<Ulid>,
    },
    /// The cycle lost its credentials; the cursor is back at zero.
    Aborted { cycle_id: Ulid },
    /// The catalog could not be read; the cursor is back at zero.
    CatalogFailed { cycle_id: Ulid, error: String },
}

/// Owns the pagination cursor and turns catalog pages into queued tasks.
pub struct BatchCoordinator {
    cursor: PaginationCursor,
    catalog: Arc<dyn AlbumCatalog>,
    queue: Arc<HarvestQueue>,
    mode: CycleMode,
    active: Mutex<Option<Arc<Cycle>>>,
}

impl BatchCoordinator {
    pub fn new(
        catalog: Arc<dyn AlbumCatalog>,
        queue: Arc<HarvestQueue>,
        page_size: u32,
        mode: CycleMode,
    ) -> Self {
        Self {
            cursor: PaginationCursor::new(page_size),
            catalog,
            queue,
            mode,
            active: Mutex::new(None),
        }
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    pub fn active_cycle(&self) -> Option<Arc<Cycle>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Begin a cycle at offset zero by queueing its first page task.
    ///
    /// Returns `None` while another cycle is still running.
    pub fn start_cycle(&self) -> Option<Arc<Cycle>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = active.as_ref() {
            debug!(cycle_id = %running.id, "Cycle already running");
            return None;
        }

        let cycle = Arc::new(Cycle::new());
        self.cursor.reset();
        *active = Some(cycle.clone());
        drop(active);

        info!(cycle_id = %cycle.id, mode = ?self.mode, "Harvest cycle started");
        self.queue.push(HarvestTask::NextPage {
            cycle: cycle.clone(),
        });
        Some(cycle)
    }

    /// Claim the next page for `cycle` and queue its albums, then its successor page.
    pub async fn dispatch(&self, cycle: &Arc<Cycle>) -> DispatchOutcome {
        if cycle.is_aborted() {
            self.cursor.reset();
            self.finish(cycle);
            warn!(
                cycle_id = %cycle.id,
                albums = cycle.albums_dispatched(),
                "Harvest cycle aborted"
            );
            return DispatchOutcome::Aborted { cycle_id: cycle.id };
        }

        let claim = self.cursor.claim();
        let watch = Stopwatch::start("catalog page read", SLOW_PAGE_THRESHOLD);
        let page = self.catalog.get_page(claim.offset, claim.limit).await;
        watch.finish();

        let albums = match page {
            Ok(albums) => albums,
            Err(e) => {
                self.cursor.reset();
                self.finish(cycle);
                error!(cycle_id = %cycle.id, offset = claim.offset, error = ?e, "Failed to read catalog page, ending cycle");
                return DispatchOutcome::CatalogFailed {
                    cycle_id: cycle.id,
                    error: format!("{e:#}"),
                };
            }
        };

        if albums.is_empty() {
            self.cursor.reset();
            self.finish(cycle);
            let total = cycle.albums_dispatched();
            info!(cycle_id = %cycle.id, albums = total, "Harvest cycle complete");

            let next_cycle = match self.mode {
                CycleMode::Continuous if total > 0 => self.start_cycle().map(|next| next.id),
                CycleMode::Continuous => {
                    debug!("Catalog is empty, not chaining another cycle");
                    None
                }
                CycleMode::Halt => None,
            };

            return DispatchOutcome::CycleComplete {
                cycle_id: cycle.id,
                albums: total,
                next_cycle,
            };
        }

        let count = albums.len();
        for album in albums {
            self.queue.push(HarvestTask::Album {
                album,
                cycle: cycle.clone(),
            });
        }
        cycle.record_dispatched(count);
        self.queue.push(HarvestTask::NextPage {
            cycle: cycle.clone(),
        });

        debug!(cycle_id = %cycle.id, offset = claim.offset, albums = count, "Page dispatched");
        DispatchOutcome::Dispatched {
            offset: claim.offset,
            albums: count,
        }
    }

    fn finish(&self, cycle: &Cycle) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|c| c.id == cycle.id) {
            *active = None;
        }
    }
}
