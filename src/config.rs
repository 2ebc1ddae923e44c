//! Environment-driven configuration, loaded through figment.

use figment::Figment;
use figment::providers::Env;
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Persisted-query hash for the `getAlbum` operation.
pub const GET_ALBUM_QUERY_HASH: &str =
    "1a33c76ec27fc5cca497d8503c656cdea3641779300d33d5964a9858c87caafe";

/// What the coordinator does after a page comes back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    /// Reset the cursor and end the chain; the scheduler starts the next cycle.
    #[default]
    Halt,
    /// Reset the cursor and immediately chain a fresh cycle from offset zero.
    Continuous,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Postgres connection string. Only the `credentials` command runs without it.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    #[serde(default = "default_partner_api_url")]
    pub partner_api_url: String,
    #[serde(default = "default_client_token_url")]
    pub client_token_url: String,
    /// Comma-separated list of pages observed for a bearer token, tried in order.
    #[serde(default = "default_seed_urls")]
    pub seed_urls: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_credential_cache_path")]
    pub credential_cache_path: PathBuf,
    #[serde(
        default = "default_credential_margin",
        deserialize_with = "deserialize_duration"
    )]
    pub credential_margin: Duration,

    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_harvest_rate_per_minute")]
    pub harvest_rate_per_minute: u32,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Album tasks one worker keeps in flight at once.
    #[serde(default = "default_tasks_per_worker")]
    pub tasks_per_worker: usize,
    #[serde(
        default = "default_cycle_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub cycle_interval: Duration,
    #[serde(default)]
    pub cycle_mode: CycleMode,
    #[serde(
        default = "default_task_soft_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub task_soft_timeout: Duration,
    #[serde(
        default = "default_task_hard_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub task_hard_timeout: Duration,
}

impl Config {
    /// Load from the process environment. Keys match field names, case-insensitively.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new().merge(Env::raw()).extract()
    }

    /// Seed pages in the order they should be tried.
    pub fn seed_urls(&self) -> Vec<String> {
        self.seed_urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_partner_api_url() -> String {
    "https://api-partner.spotify.com/pathfinder/v1/query".to_string()
}

fn default_client_token_url() -> String {
    "https://clienttoken.spotify.com/v1/clienttoken".to_string()
}

fn default_seed_urls() -> String {
    [
        "https://open.spotify.com/",
        "https://open.spotify.com/album/0HFmXICO7WgVoqLAXc7Rhw",
        "https://open.spotify.com/search",
    ]
    .join(",")
}

fn default_app_version() -> String {
    "1.2.59.53.gb992eb8d".to_string()
}

fn default_client_id() -> String {
    "d8a5ed958d274c2e8ee717e6a4b0971d".to_string()
}

fn default_credential_cache_path() -> PathBuf {
    PathBuf::from("tokens/spotify_tokens.json")
}

fn default_credential_margin() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_page_size() -> u32 {
    50
}

fn default_harvest_rate_per_minute() -> u32 {
    200
}

fn default_worker_count() -> usize {
    4
}

fn default_tasks_per_worker() -> usize {
    4
}

fn default_cycle_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_task_soft_timeout() -> Duration {
    Duration::from_secs(4 * 60)
}

fn default_task_hard_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Parse a human duration such as `"90s"`, `"5m"` or `"24h"`. Bare numbers are seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ]);
    let parsed = parser
        .parse(value.trim())
        .map_err(|e| format!("invalid duration '{value}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{value}': {e}"))
}

/// Accepts either an integer number of seconds or a fundu duration string.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
