//! Error types for the partner API client and its credential lifecycle.

/// A single failed request against the partner API.
#[derive(Debug, thiserror::Error)]
pub enum PartnerApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("unexpected HTTP {status} from {url}")]
    Status { status: u16, url: String },
    /// The API refused the credential pair; it must be refreshed before retrying.
    #[error("credentials rejected (HTTP {status})")]
    CredentialRejected { status: u16 },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl PartnerApiError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Every refresh attempt across every seed failed.
///
/// Cloneable so callers waiting behind an in-flight refresh receive the same failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "failed to acquire credentials after {} errors: {}",
    .attempts.len(),
    .attempts.join("; ")
)]
pub struct CredentialAcquisitionError {
    pub attempts: Vec<String>,
}

/// Failure to harvest a single album.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("album {album_id} failed after {attempts} attempts: {}", .errors.join("; "))]
    Exhausted {
        album_id: String,
        attempts: u32,
        errors: Vec<String>,
    },
    #[error("album {album_id} cancelled after {attempts} attempts: {}", .errors.join("; "))]
    Cancelled {
        album_id: String,
        attempts: u32,
        errors: Vec<String>,
    },
    #[error(transparent)]
    Credentials(#[from] CredentialAcquisitionError),
}

impl HarvestError {
    /// Whether this failure means no further API calls can succeed in the current cycle.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::Credentials(_))
    }
}
