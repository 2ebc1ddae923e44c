use super::Credential;
use crate::partner::json;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use html_scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, trace};

/// Lifetime assumed for a bearer token whose page omitted an expiry.
const DEFAULT_BEARER_LIFETIME_SECS: i64 = 3600;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Where fresh credentials come from. Implemented over HTTP in production and by fakes in tests.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch_client_token(&self) -> Result<Credential>;

    /// Observe a bearer token by loading `seed`.
    async fn fetch_bearer_token(&self, seed: &str) -> Result<Credential>;
}

/// Fetches seed pages and the token endpoint directly.
pub struct WebCredentialSource {
    http: reqwest::Client,
    client_token_url: String,
    client_version: String,
    client_id: String,
}

impl WebCredentialSource {
    pub fn new(
        client_token_url: impl Into<String>,
        client_version: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build credential HTTP client")?;

        Ok(Self {
            http,
            client_token_url: client_token_url.into(),
            client_version: client_version.into(),
            client_id: client_id.into(),
        })
    }

    fn client_token_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "client_data": {
                "client_version": self.client_version,
                "client_id": self.client_id,
                "js_sdk_data": {
                    "device_brand": "unknown",
                    "device_model": "unknown",
                    "os": std::env::consts::OS,
                    "os_version": "unknown",
                    "device_id": format!("{:032x}", rand::random::<u128>()),
                    "device_type": "computer",
                }
            }
        })
    }
}

#[derive(Deserialize)]
struct ClientTokenResponse {
    granted_token: GrantedToken,
}

#[derive(Deserialize)]
struct GrantedToken {
    token: String,
    expires_after_seconds: i64,
    #[serde(default)]
    refresh_after_seconds: Option<i64>,
}

impl GrantedToken {
    /// Turn relative lifetimes into timestamps, rejecting ones outside chrono's range.
    fn into_credential(self, now: DateTime<Utc>) -> Result<Credential> {
        if self.token.is_empty() {
            bail!("client token endpoint granted an empty token");
        }
        let expires_at = offset_by(now, self.expires_after_seconds)
            .with_context(|| format!("expires_after_seconds {} out of range", self.expires_after_seconds))?;
        let refresh_after = match self.refresh_after_seconds {
            Some(secs) => offset_by(now, secs)
                .with_context(|| format!("refresh_after_seconds {secs} out of range"))?,
            None => expires_at,
        };

        Ok(Credential {
            value: self.token,
            expires_at,
            refresh_after,
        })
    }
}

fn offset_by(now: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds).and_then(|delta| now.checked_add_signed(delta))
}

#[async_trait]
impl CredentialSource for WebCredentialSource {
    async fn fetch_client_token(&self) -> Result<Credential> {
        let response = self
            .http
            .post(&self.client_token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&self.client_token_payload())
            .send()
            .await
            .context("client token request failed")?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("client token endpoint returned HTTP {}", status.as_u16());
        }

        let parsed: ClientTokenResponse =
            json::decode(&body).context("unexpected client token response")?;
        let granted = parsed.granted_token;
        let credential = granted.into_credential(Utc::now())?;
        debug!(expires_at = %credential.expires_at, "Client token granted");
        Ok(credential)
    }

    async fn fetch_bearer_token(&self, seed: &str) -> Result<Credential> {
        let response = self
            .http
            .get(seed)
            .send()
            .await
            .context("seed page request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("seed page returned HTTP {}", status.as_u16());
        }
        let body = response.text().await?;

        extract_session_token(&body, Utc::now())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBlob {
    access_token: String,
    #[serde(default)]
    access_token_expiration_timestamp_ms: Option<i64>,
}

/// Find the bearer token a seed page embeds for its own player.
///
/// Looks for the `<script id="session">` JSON first, then scans all inline script text.
pub fn extract_session_token(html: &str, now: DateTime<Utc>) -> Result<Credential> {
    static SESSION_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("script#session").unwrap());
    static TOKEN_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r#""accessToken"\s*:\s*"([^"]+)""#).unwrap());
    static EXPIRY_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r#""accessTokenExpirationTimestampMs"\s*:\s*(\d+)"#).unwrap()
    });

    let document = Html::parse_document(html);

    if let Some(script) = document.select(&SESSION_SEL).next() {
        let text = script.text().collect::<String>();
        match json::decode::<SessionBlob>(text.trim()) {
            Ok(blob) if !blob.access_token.is_empty() => {
                return Ok(bearer_from(
                    blob.access_token,
                    blob.access_token_expiration_timestamp_ms,
                    now,
                ));
            }
            Ok(_) => trace!("Session script carried an empty token"),
            Err(e) => trace!(error = %e, "Session script was not usable JSON"),
        }
    }

    if let Some(caps) = TOKEN_RE.captures(html) {
        let expiry_ms = EXPIRY_RE
            .captures(html)
            .and_then(|c| c[1].parse::<i64>().ok());
        return Ok(bearer_from(caps[1].to_string(), expiry_ms, now));
    }

    bail!("no access token found in page")
}

fn bearer_from(token: String, expiry_ms: Option<i64>, now: DateTime<Utc>) -> Credential {
    let expires_at = expiry_ms
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(now + TimeDelta::seconds(DEFAULT_BEARER_LIFETIME_SECS));
    Credential::new(token, expires_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_script_is_preferred() {
        let html = r#"<html><head>
            <script id="session" type="application/json">
                {"accessToken":"BQ-from-session","accessTokenExpirationTimestampMs":1700000000000,"isAnonymous":true}
            </script>
            <script>var x = {"accessToken":"BQ-from-inline"};</script>
        </head></html>"#;
        let cred = extract_session_token(html, Utc::now()).unwrap();
        assert_eq!(cred.value, "BQ-from-session");
        assert_eq!(cred.expires_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn inline_script_fallback() {
        let html = r#"<html><body><script>
            window.__cfg = {"clientId":"abc","accessToken" : "BQ-inline","accessTokenExpirationTimestampMs": 1700000360000};
        </script></body></html>"#;
        let cred = extract_session_token(html, Utc::now()).unwrap();
        assert_eq!(cred.value, "BQ-inline");
        assert_eq!(cred.expires_at.timestamp_millis(), 1_700_000_360_000);
    }

    #[test]
    fn missing_expiry_defaults_to_an_hour() {
        let now = Utc::now();
        let html = r#"<script id="session">{"accessToken":"BQ-noexp"}</script>"#;
        let cred = extract_session_token(html, now).unwrap();
        assert_eq!(cred.expires_at, now + TimeDelta::hours(1));
    }

    #[test]
    fn page_without_token_is_an_error() {
        let html = "<html><body><p>Please enable JavaScript</p></body></html>";
        assert!(extract_session_token(html, Utc::now()).is_err());
    }

    #[test]
    fn granted_token_lifetimes() {
        let now = Utc::now();
        let granted = GrantedToken {
            token: "AAD".into(),
            expires_after_seconds: 1_209_600,
            refresh_after_seconds: Some(1_123_200),
        };
        let cred = granted.into_credential(now).unwrap();
        assert_eq!(cred.expires_at, now + TimeDelta::days(14));
        assert_eq!(cred.refresh_after, now + TimeDelta::days(13));
    }

    #[test]
    fn out_of_range_lifetimes_are_errors() {
        let now = Utc::now();
        let huge = GrantedToken {
            token: "AAD".into(),
            expires_after_seconds: i64::MAX,
            refresh_after_seconds: None,
        };
        let err = huge.into_credential(now).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");

        let bad_refresh = GrantedToken {
            token: "AAD".into(),
            expires_after_seconds: 3600,
            refresh_after_seconds: Some(i64::MIN),
        };
        assert!(bad_refresh.into_credential(now).is_err());

        let empty = GrantedToken {
            token: String::new(),
            expires_after_seconds: 3600,
            refresh_after_seconds: None,
        };
        assert!(empty.into_credential(now).is_err());
    }

    #[test]
    fn payload_carries_client_identity() {
        let source = WebCredentialSource::new("http://localhost/token", "1.2.3", "cid").unwrap();
        let payload = source.client_token_payload();
        assert_eq!(payload["client_data"]["client_version"], "1.2.3");
        assert_eq!(payload["client_data"]["client_id"], "cid");
        let device_id = payload["client_data"]["js_sdk_data"]["device_id"]
            .as_str()
            .unwrap();
        assert_eq!(device_id.len(), 32);
    }
}
