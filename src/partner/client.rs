//! Persisted-query client for album play counts.

use crate::config::GET_ALBUM_QUERY_HASH;
use crate::data::models::HarvestedAlbum;
use crate::partner::backoff::RetryPolicy;
use crate::partner::credentials::{CredentialManager, CredentialPair};
use crate::partner::errors::{HarvestError, PartnerApiError};
use crate::partner::middleware::RequestLogMiddleware;
use crate::partner::{json, parse};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tracks requested per album. Only the first page is fetched.
pub const TRACK_LIMIT: u32 = 50;

/// Fetches one album's metrics. Implemented by [`HarvestClient`] and by test doubles.
#[async_trait]
pub trait AlbumHarvester: Send + Sync {
    /// Fetch metadata and play counts for `album_id`, retrying transient failures.
    ///
    /// Stops retrying early once `cancel` fires.
    async fn fetch_album_metrics(
        &self,
        album_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HarvestedAlbum, HarvestError>;
}

pub struct HarvestClient {
    http: ClientWithMiddleware,
    credentials: Arc<CredentialManager>,
    api_url: String,
    app_version: String,
    retry: RetryPolicy,
}

impl HarvestClient {
    pub fn new(
        credentials: Arc<CredentialManager>,
        api_url: impl Into<String>,
        app_version: impl Into<String>,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build partner API client")?;
        let http = ClientBuilder::new(inner).with(RequestLogMiddleware).build();

        Ok(Self {
            http,
            credentials,
            api_url: api_url.into(),
            app_version: app_version.into(),
            retry,
        })
    }

    /// A single request with the given credentials.
    async fn request_album(
        &self,
        album_id: &str,
        pair: &CredentialPair,
    ) -> Result<HarvestedAlbum, PartnerApiError> {
        let variables = serde_json::json!({
            "uri": format!("spotify:album:{album_id}"),
            "locale": "",
            "offset": 0,
            "limit": TRACK_LIMIT,
        });
        let extensions = serde_json::json!({
            "persistedQuery": {
                "version": 1,
                "sha256Hash": GET_ALBUM_QUERY_HASH,
            }
        });

        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("operationName", "getAlbum".to_string()),
                ("variables", variables.to_string()),
                ("extensions", extensions.to_string()),
            ])
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", pair.bearer.value),
            )
            .header("client-token", pair.client.value.as_str())
            .header("app-platform", "WebPlayer")
            .header("spotify-app-version", self.app_version.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(PartnerApiError::CredentialRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(PartnerApiError::Status {
                status: status.as_u16(),
                url: response.url().path().to_owned(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(reqwest_middleware::Error::from)?;
        let value: Value =
            json::decode(&body).map_err(|e| PartnerApiError::malformed(format!("{e:#}")))?;

        parse::parse_album_response(album_id, &value, Utc::now())
    }
}

#[async_trait]
impl AlbumHarvester for HarvestClient {
    async fn fetch_album_metrics(
        &self,
        album_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HarvestedAlbum, HarvestError> {
        let mut errors = Vec::new();

        for attempt in 0..self.retry.max_retries {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled {
                    album_id: album_id.to_owned(),
                    attempts: attempt,
                    errors,
                });
            }

            let pair = self.credentials.get_valid_credentials().await?;

            match self.request_album(album_id, &pair).await {
                Ok(harvested) => {
                    debug!(
                        album_id,
                        attempt = attempt + 1,
                        tracks = harvested.samples.len(),
                        "Album harvested"
                    );
                    return Ok(harvested);
                }
                Err(e) => {
                    warn!(album_id, attempt = attempt + 1, error = %e, "Album request failed");
                    if matches!(e, PartnerApiError::CredentialRejected { .. }) {
                        self.credentials.invalidate(&pair).await;
                    }
                    errors.push(format!("attempt {}: {e}", attempt + 1));
                }
            }

            if !self.retry.is_last(attempt) {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(HarvestError::Cancelled {
                            album_id: album_id.to_owned(),
                            attempts: attempt + 1,
                            errors,
                        });
                    }
                    _ = tokio::time::sleep(self.retry.delay(attempt)) => {}
                }
            }
        }

        Err(HarvestError::Exhausted {
            album_id: album_id.to_owned(),
            attempts: self.retry.max_retries,
            errors,
        })
    }
}
