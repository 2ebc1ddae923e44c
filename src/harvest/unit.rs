use crate::data::models::{AlbumOutcome, AlbumRef};
use crate::data::sink::HarvestStore;
use crate::harvest::queue::Cycle;
use crate::partner::client::AlbumHarvester;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Fetch one album and persist it. Every failure ends up in the returned outcome.
///
/// A credential failure additionally aborts `cycle`, since no later album in it can succeed.
pub async fn harvest_album(
    harvester: &dyn AlbumHarvester,
    store: &dyn HarvestStore,
    album: &AlbumRef,
    cycle: Option<&Cycle>,
    cancel: &CancellationToken,
) -> AlbumOutcome {
    let start = Instant::now();
    let cycle_id = cycle.map(|c| c.id);
    let album_id = album.album_id.as_str();

    let harvested = match harvester.fetch_album_metrics(album_id, cancel).await {
        Ok(harvested) => harvested,
        Err(e) => {
            if e.is_credential_failure() {
                error!(album_id, error = %e, "Credentials unavailable");
                if let Some(cycle) = cycle {
                    cycle.abort();
                }
            } else {
                warn!(album_id, error = %e, "Album harvest failed");
            }
            return AlbumOutcome::error(cycle_id, album_id, e.to_string(), start.elapsed());
        }
    };

    match store.save(album, &harvested).await {
        Ok(saved) => AlbumOutcome::success(cycle_id, album_id, saved, start.elapsed()),
        Err(e) => {
            warn!(album_id, error = ?e, "Failed to persist album");
            AlbumOutcome::error(cycle_id, album_id, format!("{e:#}"), start.elapsed())
        }
    }
}
