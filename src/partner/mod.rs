//! Client for the web player's partner API and the credentials it needs.

pub mod backoff;
pub mod client;
pub mod credentials;
pub mod errors;
pub mod json;
pub mod middleware;
pub mod parse;

pub use backoff::RetryPolicy;
pub use client::{AlbumHarvester, HarvestClient};
pub use credentials::{
    Credential, CredentialManager, CredentialOptions, CredentialPair, CredentialSource,
    CredentialStore, WebCredentialSource,
};
pub use errors::{CredentialAcquisitionError, HarvestError, PartnerApiError};
