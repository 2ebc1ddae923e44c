use super::{Credential, CredentialPair};
use crate::partner::json;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// On-disk shape of the credential cache.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    bearer_token: String,
    client_token: String,
    /// When the pair was fetched.
    #[serde(with = "chrono::serde::ts_seconds")]
    timestamp: DateTime<Utc>,
    /// The earlier of the two expiries.
    #[serde(with = "chrono::serde::ts_seconds")]
    expires_at: DateTime<Utc>,
}

/// Holds the current credential pair and mirrors it to a JSON cache file so a
/// restarted process can reuse still-valid tokens.
pub struct CredentialStore {
    cache_path: PathBuf,
    held: RwLock<Option<CredentialPair>>,
}

impl CredentialStore {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
            held: RwLock::new(None),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub async fn current(&self) -> Option<CredentialPair> {
        self.held.read().await.clone()
    }

    pub async fn replace(&self, pair: CredentialPair) {
        *self.held.write().await = Some(pair);
    }

    pub async fn clear(&self) {
        *self.held.write().await = None;
    }

    /// Clear the held pair only if it is still `rejected`, running `on_clear` under the
    /// same write lock. Returns whether it was cleared.
    pub async fn clear_if_held(&self, rejected: &CredentialPair, on_clear: impl FnOnce()) -> bool {
        let mut held = self.held.write().await;
        let still_held = held.as_ref().is_some_and(|pair| {
            pair.bearer.value == rejected.bearer.value && pair.client.value == rejected.client.value
        });
        if still_held {
            *held = None;
            on_clear();
        }
        still_held
    }

    /// Read the cache file. A missing file is `Ok(None)`; validity is left to the caller.
    pub async fn load_cache(&self) -> Result<Option<CredentialPair>> {
        let body = match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read credential cache {}", self.cache_path.display())
                });
            }
        };

        let cached: CacheFile = json::decode(&body).with_context(|| {
            format!("Corrupt credential cache {}", self.cache_path.display())
        })?;

        Ok(Some(CredentialPair {
            bearer: Credential::new(cached.bearer_token, cached.expires_at),
            client: Credential::new(cached.client_token, cached.expires_at),
        }))
    }

    /// Atomically rewrite the cache file with `pair`.
    pub async fn save_cache(&self, pair: &CredentialPair) -> Result<()> {
        if let Some(parent) = self.cache_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = CacheFile {
            bearer_token: pair.bearer.value.clone(),
            client_token: pair.client.value.clone(),
            timestamp: Utc::now(),
            expires_at: pair.expires_at(),
        };
        let body = serde_json::to_string_pretty(&file)?;

        let mut tmp = self.cache_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.cache_path)
            .await
            .with_context(|| format!("Failed to move cache into {}", self.cache_path.display()))?;

        debug!(path = %self.cache_path.display(), expires_at = %file.expires_at, "Credential cache written");
        Ok(())
    }
}
