use super::{CredentialPair, CredentialSource, CredentialStore};
use crate::partner::backoff::RetryPolicy;
use crate::partner::errors::CredentialAcquisitionError;
use crate::utils::fmt_duration;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CredentialOptions {
    /// Seed pages tried in order for a bearer token.
    pub seeds: Vec<String>,
    /// A credential this close to expiry is treated as expired.
    pub margin: Duration,
    pub retry: RetryPolicy,
}

/// Hands out a valid [`CredentialPair`], refreshing through the source when needed.
///
/// At most one refresh runs at a time. Callers that queued behind a refresh take its
/// result (pair or failure) instead of starting another one.
pub struct CredentialManager {
    source: Arc<dyn CredentialSource>,
    store: CredentialStore,
    options: CredentialOptions,
    /// Guards refreshes; holds the failure of the last one so waiters can share it.
    refresh_lock: Mutex<Option<CredentialAcquisitionError>>,
    /// Bumped after every completed refresh.
    generation: AtomicU64,
    /// Cleared by `invalidate` so a rejected pair is not reloaded from disk.
    cache_trusted: AtomicBool,
}

impl CredentialManager {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        store: CredentialStore,
        options: CredentialOptions,
    ) -> Self {
        Self {
            source,
            store,
            options,
            refresh_lock: Mutex::new(None),
            generation: AtomicU64::new(0),
            cache_trusted: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub async fn get_valid_credentials(&self) -> Result<CredentialPair, CredentialAcquisitionError> {
        if let Some(pair) = self.usable_held().await {
            return Ok(pair);
        }

        if self.cache_trusted.load(Ordering::Acquire)
            && let Some(pair) = self.usable_cached().await
        {
            self.store.replace(pair.clone()).await;
            return Ok(pair);
        }

        let seen = self.generation.load(Ordering::Acquire);
        let mut last_failure = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(pair) = self.usable_held().await {
                return Ok(pair);
            }
            if let Some(err) = last_failure.as_ref() {
                debug!("Sharing failure of the refresh that just completed");
                return Err(err.clone());
            }
        }

        if let Some(pair) = self.usable_held().await {
            return Ok(pair);
        }

        let result = self.refresh().await;
        *last_failure = result.as_ref().err().cloned();
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Refresh regardless of what is currently held.
    pub async fn force_refresh(&self) -> Result<CredentialPair, CredentialAcquisitionError> {
        let mut last_failure = self.refresh_lock.lock().await;
        let result = self.refresh().await;
        *last_failure = result.as_ref().err().cloned();
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Drop `rejected` after the API refused it. The next call refreshes without
    /// consulting the cache file.
    ///
    /// A no-op when another caller already replaced `rejected`, so late rejections of an
    /// old pair do not discard its fresh successor.
    pub async fn invalidate(&self, rejected: &CredentialPair) {
        let cleared = self
            .store
            .clear_if_held(rejected, || self.cache_trusted.store(false, Ordering::Release))
            .await;
        if cleared {
            info!("Credentials invalidated");
        } else {
            debug!("Rejected credentials were already replaced");
        }
    }

    async fn usable_held(&self) -> Option<CredentialPair> {
        self.store
            .current()
            .await
            .filter(|pair| pair.is_usable_at(Utc::now(), self.options.margin))
    }

    async fn usable_cached(&self) -> Option<CredentialPair> {
        match self.store.load_cache().await {
            Ok(Some(pair)) if pair.is_usable_at(Utc::now(), self.options.margin) => {
                debug!(expires_at = %pair.expires_at(), "Loaded credentials from cache");
                Some(pair)
            }
            Ok(Some(pair)) => {
                debug!(expires_at = %pair.expires_at(), "Cached credentials are stale");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = ?e, "Ignoring unreadable credential cache");
                None
            }
        }
    }

    /// Runs with `refresh_lock` held.
    async fn refresh(&self) -> Result<CredentialPair, CredentialAcquisitionError> {
        let start = Instant::now();
        let retry = self.options.retry;
        let mut errors = Vec::new();

        for attempt in 0..retry.max_retries {
            if let Some(pair) = self.attempt(attempt, &mut errors).await {
                self.store.replace(pair.clone()).await;
                if let Err(e) = self.store.save_cache(&pair).await {
                    warn!(error = ?e, "Failed to persist credential cache");
                }
                self.cache_trusted.store(true, Ordering::Release);

                info!(
                    attempt = attempt + 1,
                    expires_at = %pair.expires_at(),
                    duration = fmt_duration(start.elapsed()),
                    "Credentials refreshed"
                );
                return Ok(pair);
            }

            if !retry.is_last(attempt) {
                let delay = retry.delay(attempt);
                debug!(
                    attempt = attempt + 1,
                    delay = fmt_duration(delay),
                    "Credential refresh failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let err = CredentialAcquisitionError { attempts: errors };
        warn!(
            attempts = retry.max_retries,
            duration = fmt_duration(start.elapsed()),
            error = %err,
            "Credential refresh exhausted"
        );
        Err(err)
    }

    /// One pass: client token, then each seed until a bearer token is observed.
    async fn attempt(&self, attempt: u32, errors: &mut Vec<String>) -> Option<CredentialPair> {
        let n = attempt + 1;
        let margin = self.options.margin;

        let client = match self.source.fetch_client_token().await {
            Ok(client) if client.is_usable_at(Utc::now(), margin) => client,
            Ok(client) => {
                errors.push(format!(
                    "attempt {n}: client token expires at {} inside the safety margin",
                    client.expires_at
                ));
                return None;
            }
            Err(e) => {
                errors.push(format!("attempt {n}: client token: {e:#}"));
                return None;
            }
        };

        if self.options.seeds.is_empty() {
            errors.push(format!("attempt {n}: no seed pages configured"));
            return None;
        }

        for seed in &self.options.seeds {
            match self.source.fetch_bearer_token(seed).await {
                Ok(bearer) if bearer.is_usable_at(Utc::now(), margin) => {
                    return Some(CredentialPair { bearer, client });
                }
                Ok(bearer) => errors.push(format!(
                    "attempt {n}: seed {seed}: bearer token expires at {} inside the safety margin",
                    bearer.expires_at
                )),
                Err(e) => errors.push(format!("attempt {n}: seed {seed}: {e:#}")),
            }
        }

        None
    }
}
