//! Records that flow between the catalog, the harvest client, and the sink.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use ulid::Ulid;

/// One album from the catalog. Immutable; identified by `album_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlbumRef {
    pub album_id: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_name: String,
}

impl AlbumRef {
    /// An album known only by id, e.g. one requested on the command line.
    pub fn bare(album_id: impl Into<String>) -> Self {
        Self {
            album_id: album_id.into(),
            artist_id: String::new(),
            artist_name: String::new(),
            album_name: String::new(),
        }
    }
}

/// Album-level fields extracted from a harvest response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumMetadata {
    pub album_name: String,
    pub artist_name: String,
    pub artist_id: Option<String>,
    pub cover_art: Option<String>,
    pub release_date: Option<NaiveDate>,
}

/// A play count observed for one track.
///
/// Deduplicated on `(track_id, album_id, play_count)`: an unchanged count is the same
/// observation regardless of `observed_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub track_id: String,
    pub album_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub play_count: i64,
    pub observed_at: DateTime<Utc>,
}

/// Everything one successful harvest of an album produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestedAlbum {
    pub album_id: String,
    pub metadata: AlbumMetadata,
    pub samples: Vec<MetricSample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveResult {
    pub tracks_written: u64,
    pub samples_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
    /// Skipped because the cycle lost its credentials.
    Aborted,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-album result record. A failure here never propagates past the album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumOutcome {
    pub cycle_id: Option<Ulid>,
    pub album_id: String,
    pub status: OutcomeStatus,
    pub detail: Option<String>,
    pub saved: SaveResult,
    pub duration: Duration,
}

impl AlbumOutcome {
    pub fn success(
        cycle_id: Option<Ulid>,
        album_id: &str,
        saved: SaveResult,
        duration: Duration,
    ) -> Self {
        Self {
            cycle_id,
            album_id: album_id.to_owned(),
            status: OutcomeStatus::Success,
            detail: None,
            saved,
            duration,
        }
    }

    pub fn error(
        cycle_id: Option<Ulid>,
        album_id: &str,
        detail: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            cycle_id,
            album_id: album_id.to_owned(),
            status: OutcomeStatus::Error,
            detail: Some(detail.into()),
            saved: SaveResult::default(),
            duration,
        }
    }

    pub fn aborted(cycle_id: Option<Ulid>, album_id: &str, reason: impl Into<String>) -> Self {
        Self {
            cycle_id,
            album_id: album_id.to_owned(),
            status: OutcomeStatus::Aborted,
            detail: Some(reason.into()),
            saved: SaveResult::default(),
            duration: Duration::ZERO,
        }
    }
}
