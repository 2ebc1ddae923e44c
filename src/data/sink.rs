//! Idempotent persistence of harvested albums and per-album outcomes.

use crate::data::models::{AlbumOutcome, AlbumRef, HarvestedAlbum, MetricSample, SaveResult};
use crate::utils::duration_millis;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use ulid::Ulid;

/// Where harvest results go.
#[async_trait]
pub trait HarvestStore: Send + Sync {
    /// Write one album's harvest atomically. Re-saving the same observations writes no new samples.
    async fn save(&self, album: &AlbumRef, harvest: &HarvestedAlbum) -> Result<SaveResult>;

    async fn record_outcome(&self, outcome: &AlbumOutcome) -> Result<()>;
}

/// Album row values after merging the catalog entry with the fresh response.
#[derive(Debug, PartialEq, Eq)]
pub struct AlbumRow<'a> {
    pub album_id: &'a str,
    pub artist_id: &'a str,
    pub name: &'a str,
    pub artist_name: &'a str,
}

impl<'a> AlbumRow<'a> {
    /// Response values win for names; the catalog's artist id wins when it has one.
    pub fn merge(album: &'a AlbumRef, harvest: &'a HarvestedAlbum) -> Self {
        let meta = &harvest.metadata;
        let artist_id = if album.artist_id.is_empty() {
            meta.artist_id.as_deref().unwrap_or("")
        } else {
            album.artist_id.as_str()
        };
        Self {
            album_id: &harvest.album_id,
            artist_id,
            name: non_empty(&meta.album_name, &album.album_name),
            artist_name: non_empty(&meta.artist_name, &album.artist_name),
        }
    }
}

fn non_empty<'a>(preferred: &'a str, fallback: &'a str) -> &'a str {
    if preferred.trim().is_empty() {
        fallback
    } else {
        preferred
    }
}

/// Samples with distinct `(track, album, count)` keys, first occurrence kept.
pub fn distinct_samples(samples: &[MetricSample]) -> Vec<&MetricSample> {
    let mut seen = HashSet::new();
    samples
        .iter()
        .filter(|s| seen.insert((s.track_id.as_str(), s.album_id.as_str(), s.play_count)))
        .collect()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Outcome counts by status for one cycle, as recorded in `harvest_results`.
    pub async fn cycle_summary(&self, cycle_id: Ulid) -> Result<Vec<(String, i64)>> {
        sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM harvest_results
            WHERE cycle_id = $1
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(cycle_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to summarize harvest results")
    }
}

#[async_trait]
impl HarvestStore for PgStore {
    async fn save(&self, album: &AlbumRef, harvest: &HarvestedAlbum) -> Result<SaveResult> {
        let row = AlbumRow::merge(album, harvest);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO albums (album_id, artist_id, name, cover_art, release_date, artist_name, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (album_id)
            DO UPDATE SET
                artist_id = EXCLUDED.artist_id,
                name = EXCLUDED.name,
                cover_art = COALESCE(EXCLUDED.cover_art, albums.cover_art),
                release_date = COALESCE(EXCLUDED.release_date, albums.release_date),
                artist_name = EXCLUDED.artist_name,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(row.album_id)
        .bind(row.artist_id)
        .bind(row.name)
        .bind(harvest.metadata.cover_art.as_deref())
        .bind(harvest.metadata.release_date)
        .bind(row.artist_name)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert album {}", row.album_id))?;

        if harvest.samples.is_empty() {
            tx.commit().await?;
            return Ok(SaveResult::default());
        }

        // Keep the last occurrence per track so a repeated track takes its latest name.
        let mut seen = HashSet::new();
        let tracks: Vec<&MetricSample> = harvest
            .samples
            .iter()
            .rev()
            .filter(|s| seen.insert(s.track_id.as_str()))
            .collect();

        let track_ids: Vec<&str> = tracks.iter().map(|s| s.track_id.as_str()).collect();
        let track_names: Vec<&str> = tracks.iter().map(|s| s.track_name.as_str()).collect();
        let artist_ids: Vec<&str> = vec![row.artist_id; tracks.len()];
        let album_ids: Vec<&str> = vec![row.album_id; tracks.len()];

        let tracks_written = sqlx::query(
            r#"
            INSERT INTO tracks (track_id, name, artist_id, album_id)
            SELECT v.track_id, v.name, v.artist_id, v.album_id
            FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
                AS v(track_id, name, artist_id, album_id)
            ON CONFLICT (track_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                artist_id = EXCLUDED.artist_id,
                album_id = EXCLUDED.album_id
            "#,
        )
        .bind(&track_ids)
        .bind(&track_names)
        .bind(&artist_ids)
        .bind(&album_ids)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert tracks for album {}", row.album_id))?
        .rows_affected();

        let samples = distinct_samples(&harvest.samples);
        let sample_tracks: Vec<&str> = samples.iter().map(|s| s.track_id.as_str()).collect();
        let play_counts: Vec<i64> = samples.iter().map(|s| s.play_count).collect();
        let sample_albums: Vec<&str> = samples.iter().map(|s| s.album_id.as_str()).collect();
        let observed: Vec<DateTime<Utc>> = samples.iter().map(|s| s.observed_at).collect();

        let samples_written = sqlx::query(
            r#"
            INSERT INTO streams (track_id, play_count, album_id, timestamp)
            SELECT v.track_id, v.play_count, v.album_id, v.observed_at
            FROM UNNEST($1::text[], $2::int8[], $3::text[], $4::timestamptz[])
                AS v(track_id, play_count, album_id, observed_at)
            ON CONFLICT ON CONSTRAINT streams_track_count_album_key DO NOTHING
            "#,
        )
        .bind(&sample_tracks)
        .bind(&play_counts)
        .bind(&sample_albums)
        .bind(&observed)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert samples for album {}", row.album_id))?
        .rows_affected();

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit album {}", row.album_id))?;

        Ok(SaveResult {
            tracks_written,
            samples_written,
        })
    }

    async fn record_outcome(&self, outcome: &AlbumOutcome) -> Result<()> {
        let duration_ms = duration_millis(outcome.duration);
        sqlx::query(
            r#"
            INSERT INTO harvest_results
                (cycle_id, album_id, status, detail, tracks_written, samples_written, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(outcome.cycle_id.map(|id| id.to_string()))
        .bind(&outcome.album_id)
        .bind(outcome.status.as_str())
        .bind(outcome.detail.as_deref())
        .bind(i64::try_from(outcome.saved.tracks_written).unwrap_or(i64::MAX))
        .bind(i64::try_from(outcome.saved.samples_written).unwrap_or(i64::MAX))
        .bind(duration_ms)
        .execute(&self.pool)
        .await
        .context("Failed to record harvest outcome")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::AlbumMetadata;

    fn sample(track: &str, count: i64) -> MetricSample {
        MetricSample {
            track_id: track.to_string(),
            album_id: "A1".to_string(),
            track_name: format!("Track {track}"),
            artist_name: "Artist".to_string(),
            play_count: count,
            observed_at: Utc::now(),
        }
    }

    fn harvested(meta: AlbumMetadata) -> HarvestedAlbum {
        HarvestedAlbum {
            album_id: "A1".to_string(),
            metadata: meta,
            samples: vec![],
        }
    }

    #[test]
    fn catalog_artist_id_wins_when_present() {
        let album = AlbumRef {
            album_id: "A1".into(),
            artist_id: "catalog-artist".into(),
            artist_name: "Catalog Name".into(),
            album_name: "Catalog Album".into(),
        };
        let harvest = harvested(AlbumMetadata {
            album_name: "Fresh Album".into(),
            artist_name: "Fresh Name".into(),
            artist_id: Some("response-artist".into()),
            ..Default::default()
        });
        let row = AlbumRow::merge(&album, &harvest);
        assert_eq!(row.artist_id, "catalog-artist");
        assert_eq!(row.name, "Fresh Album");
        assert_eq!(row.artist_name, "Fresh Name");
    }

    #[test]
    fn bare_album_takes_everything_from_response() {
        let album = AlbumRef::bare("A1");
        let harvest = harvested(AlbumMetadata {
            album_name: "Fresh Album".into(),
            artist_name: "".into(),
            artist_id: Some("response-artist".into()),
            ..Default::default()
        });
        let row = AlbumRow::merge(&album, &harvest);
        assert_eq!(row.artist_id, "response-artist");
        assert_eq!(row.artist_name, "");
    }

    #[test]
    fn identical_samples_collapse() {
        let samples = vec![sample("T", 100), sample("T", 100), sample("T", 101), sample("U", 100)];
        let distinct = distinct_samples(&samples);
        let keys: Vec<(&str, i64)> = distinct
            .iter()
            .map(|s| (s.track_id.as_str(), s.play_count))
            .collect();
        assert_eq!(keys, vec![("T", 100), ("T", 101), ("U", 100)]);
    }
}
