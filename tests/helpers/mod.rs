//! In-memory stand-ins for the catalog, the sink, the partner API and the credential source.
#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use streamwatch::data::catalog::AlbumCatalog;
use streamwatch::data::models::{
    AlbumMetadata, AlbumOutcome, AlbumRef, HarvestedAlbum, MetricSample, OutcomeStatus, SaveResult,
};
use streamwatch::data::sink::HarvestStore;
use streamwatch::partner::backoff::RetryPolicy;
use streamwatch::partner::client::AlbumHarvester;
use streamwatch::partner::credentials::{
    Credential, CredentialManager, CredentialOptions, CredentialSource, CredentialStore,
};
use streamwatch::partner::errors::{CredentialAcquisitionError, HarvestError};
use tokio_util::sync::CancellationToken;

pub const MARGIN: Duration = Duration::from_secs(300);

/// A cache path unique to one test.
pub fn temp_cache_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("streamwatch-test-{}", ulid::Ulid::new()))
        .join("tokens.json")
}

pub fn album(id: &str) -> AlbumRef {
    AlbumRef {
        album_id: id.to_string(),
        artist_id: format!("artist-{id}"),
        artist_name: format!("Artist {id}"),
        album_name: format!("Album {id}"),
    }
}

/// A harvest of `album_id` whose tracks have the given play counts.
pub fn harvested(album_id: &str, counts: &[i64]) -> HarvestedAlbum {
    let observed_at = Utc::now();
    HarvestedAlbum {
        album_id: album_id.to_string(),
        metadata: AlbumMetadata {
            album_name: format!("Album {album_id}"),
            artist_name: format!("Artist {album_id}"),
            artist_id: Some(format!("artist-{album_id}")),
            cover_art: None,
            release_date: None,
        },
        samples: counts
            .iter()
            .enumerate()
            .map(|(i, &play_count)| MetricSample {
                track_id: format!("{album_id}-t{i}"),
                album_id: album_id.to_string(),
                track_name: format!("Track {i}"),
                artist_name: format!("Artist {album_id}"),
                play_count,
                observed_at,
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCatalog {
    albums: Vec<AlbumRef>,
    pub fail: AtomicBool,
    /// Page reads panic instead of returning.
    pub panic: AtomicBool,
    pub reads: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            albums: ids.iter().map(|id| album(id)).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AlbumCatalog for MemoryCatalog {
    async fn get_page(&self, offset: i64, limit: i64) -> Result<Vec<AlbumRef>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.panic.load(Ordering::SeqCst) {
            panic!("catalog driver crashed");
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("catalog unavailable");
        }
        Ok(self
            .albums
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Applies the same natural keys as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    pub albums: Mutex<HashMap<String, String>>,
    pub tracks: Mutex<HashMap<String, String>>,
    pub streams: Mutex<HashSet<(String, String, i64)>>,
    pub outcomes: Mutex<Vec<AlbumOutcome>>,
    /// Albums whose save fails.
    pub failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    pub fn statuses(&self) -> HashMap<String, OutcomeStatus> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .map(|o| (o.album_id.clone(), o.status))
            .collect()
    }

    pub fn outcome(&self, album_id: &str) -> Option<AlbumOutcome> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.album_id == album_id)
            .cloned()
    }
}

#[async_trait]
impl HarvestStore for MemoryStore {
    async fn save(&self, album: &AlbumRef, harvest: &HarvestedAlbum) -> Result<SaveResult> {
        if self.failing.lock().unwrap().contains(&album.album_id) {
            return Err(anyhow!("constraint violation for {}", album.album_id));
        }

        self.albums
            .lock()
            .unwrap()
            .insert(harvest.album_id.clone(), harvest.metadata.album_name.clone());

        let mut tracks = self.tracks.lock().unwrap();
        let mut streams = self.streams.lock().unwrap();
        let mut result = SaveResult::default();
        let mut touched = HashSet::new();
        for sample in &harvest.samples {
            if touched.insert(sample.track_id.clone()) {
                tracks.insert(sample.track_id.clone(), sample.track_name.clone());
                result.tracks_written += 1;
            }
            if streams.insert((
                sample.track_id.clone(),
                sample.album_id.clone(),
                sample.play_count,
            )) {
                result.samples_written += 1;
            }
        }
        Ok(result)
    }

    async fn record_outcome(&self, outcome: &AlbumOutcome) -> Result<()> {
        self.outcomes.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Script {
    Harvest(HarvestedAlbum),
    Fail(String),
    NoCredentials,
    /// Sleeps until cancelled, then reports cancellation.
    HangUntilCancelled,
    /// Sleeps for the given time regardless of cancellation.
    Stall(Duration),
    Panic,
}

#[derive(Default)]
pub struct ScriptedHarvester {
    scripts: Mutex<HashMap<String, Script>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedHarvester {
    pub fn with(self, album_id: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(album_id.to_string(), script);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AlbumHarvester for ScriptedHarvester {
    async fn fetch_album_metrics(
        &self,
        album_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HarvestedAlbum, HarvestError> {
        self.calls.lock().unwrap().push(album_id.to_string());
        let script = self.scripts.lock().unwrap().get(album_id).cloned();

        match script {
            Some(Script::Harvest(harvest)) => Ok(harvest),
            None => Ok(harvested(album_id, &[1])),
            Some(Script::Fail(msg)) => Err(HarvestError::Exhausted {
                album_id: album_id.to_string(),
                attempts: 3,
                errors: vec![msg; 3],
            }),
            Some(Script::NoCredentials) => Err(HarvestError::Credentials(
                CredentialAcquisitionError {
                    attempts: vec!["attempt 1: seed unreachable".to_string()],
                },
            )),
            Some(Script::HangUntilCancelled) => {
                cancel.cancelled().await;
                Err(HarvestError::Cancelled {
                    album_id: album_id.to_string(),
                    attempts: 1,
                    errors: vec!["attempt 1: timed out".to_string()],
                })
            }
            Some(Script::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(harvested(album_id, &[1]))
            }
            Some(Script::Panic) => panic!("harvester bug on {album_id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Credential source
// ---------------------------------------------------------------------------

/// Counts fetches and hands out numbered tokens.
pub struct FakeSource {
    pub client_fetches: AtomicUsize,
    pub bearer_fetches: AtomicUsize,
    /// Seeds that always fail.
    pub broken_seeds: Mutex<HashSet<String>>,
    pub client_fails: AtomicBool,
    pub lifetime: Mutex<TimeDelta>,
    pub delay: Duration,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            client_fetches: AtomicUsize::new(0),
            bearer_fetches: AtomicUsize::new(0),
            broken_seeds: Mutex::new(HashSet::new()),
            client_fails: AtomicBool::new(false),
            lifetime: Mutex::new(TimeDelta::hours(1)),
            delay: Duration::ZERO,
        }
    }
}

impl FakeSource {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn break_seed(&self, seed: &str) {
        self.broken_seeds.lock().unwrap().insert(seed.to_string());
    }

    pub fn clients(&self) -> usize {
        self.client_fetches.load(Ordering::SeqCst)
    }

    pub fn bearers(&self) -> usize {
        self.bearer_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for FakeSource {
    async fn fetch_client_token(&self) -> Result<Credential> {
        let n = self.client_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.client_fails.load(Ordering::SeqCst) {
            bail!("token endpoint returned HTTP 503");
        }
        let lifetime = *self.lifetime.lock().unwrap();
        Ok(Credential::new(format!("client-{n}"), Utc::now() + lifetime))
    }

    async fn fetch_bearer_token(&self, seed: &str) -> Result<Credential> {
        let n = self.bearer_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.broken_seeds.lock().unwrap().contains(seed) {
            bail!("no access token found in page");
        }
        let lifetime = *self.lifetime.lock().unwrap();
        Ok(Credential::new(format!("bearer-{n}"), Utc::now() + lifetime))
    }
}

pub const SEEDS: [&str; 2] = ["https://seed.one/", "https://seed.two/"];

pub fn manager(source: std::sync::Arc<FakeSource>, cache_path: PathBuf) -> CredentialManager {
    CredentialManager::new(
        source,
        CredentialStore::new(cache_path),
        CredentialOptions {
            seeds: SEEDS.iter().map(|s| s.to_string()).collect(),
            margin: MARGIN,
            retry: RetryPolicy::immediate(3),
        },
    )
}
