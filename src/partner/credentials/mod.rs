//! Short-lived bearer and client tokens for the partner API.

mod manager;
mod source;
mod store;

pub use manager::{CredentialManager, CredentialOptions};
pub use source::{CredentialSource, WebCredentialSource, extract_session_token};
pub use store::CredentialStore;

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// One secret with its expiry. The value is kept out of `Debug` output.
#[derive(Clone, PartialEq, Eq, custom_debug_derive::Debug)]
pub struct Credential {
    #[debug(skip)]
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_after: DateTime<Utc>,
}

impl Credential {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
            refresh_after: expires_at,
        }
    }

    /// Usable only while `now < expires_at - margin`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Ok(margin) = TimeDelta::from_std(margin) else {
            return false;
        };
        match self.expires_at.checked_sub_signed(margin) {
            Some(deadline) => !self.value.is_empty() && now < deadline,
            None => false,
        }
    }
}

/// Bearer and client credential handed to the harvest client together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub bearer: Credential,
    pub client: Credential,
}

impl CredentialPair {
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.bearer.is_usable_at(now, margin) && self.client.is_usable_at(now, margin)
    }

    /// The earlier of the two expiries.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.bearer.expires_at.min(self.client.expires_at)
    }
}
