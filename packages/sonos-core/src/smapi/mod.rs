//! SMAPI: the SOAP dialect music services expose to Sonos players.
//!
//! Requests go straight to the service's `SecureUri` with a `<credentials>`
//! header identifying the household. Linked services (DeviceLink/AppLink)
//! add a login token that the service may rotate at any call through a
//! `TokenRefreshRequired` fault; [`SmapiClient`] persists the new pair and
//! retries once.

pub mod auth;
pub mod client;
pub mod credentials;
pub mod fault;
pub mod identity;
pub mod presentation;
pub mod types;

use thiserror::Error;

use crate::error::ErrorCode;
use crate::sonos::discovery::DiscoveryError;
use crate::sonos::soap::SoapError;
use crate::sonos::transport::TransportError;
use crate::store::StoreError;

pub use auth::{poll_interval, poll_until_linked, AppLinkParams};
pub use client::SmapiClient;
pub use credentials::SmapiIdentity;
pub use fault::{RefreshedCredentials, SmapiFault};
pub use identity::resolve_identity;
pub use presentation::{fetch_search_categories, SearchCategories};
pub use types::{LinkCode, MediaItem, MediaList, TokenPair};

/// Errors raised by SMAPI calls and the link flow.
#[derive(Debug, Error)]
pub enum SmapiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A speaker call made while resolving identity failed.
    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Fault(#[from] SmapiFault),

    #[error("SMAPI request failed with HTTP {0}")]
    HttpStatus(u16),

    #[error("SMAPI parse error: {0}")]
    Parse(String),

    /// A linked service was called without stored credentials.
    #[error("{service} is not linked")]
    NotLinked { service: String },

    #[error("{service} uses {policy} auth, which has no link flow")]
    UnsupportedAuth { service: String, policy: String },

    #[error("no search category {0:?}")]
    UnknownCategory(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operation cancelled")]
    Cancelled,
}

impl SmapiError {
    /// The service is still waiting for the user to approve the link.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Fault(f) if f.is_pending())
    }
}

impl ErrorCode for SmapiError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.code(),
            Self::Soap(e) => e.code(),
            Self::Discovery(e) => e.code(),
            Self::Fault(SmapiFault::Pending(_)) => "smapi_link_pending",
            Self::Fault(SmapiFault::TokenRefreshRequired(_)) => "smapi_token_refresh_required",
            Self::Fault(SmapiFault::InvalidLinkCode) => "invalid_link_code",
            Self::Fault(SmapiFault::Other { .. }) => "smapi_fault",
            Self::HttpStatus(_) => "http_error_status",
            Self::Parse(_) => "smapi_parse_error",
            Self::NotLinked { .. } => "smapi_not_linked",
            Self::UnsupportedAuth { .. } => "unsupported_auth",
            Self::UnknownCategory(_) => "unknown_search_category",
            Self::Store(e) => e.code(),
            Self::Cancelled => "cancelled",
        }
    }
}

/// Convenient Result alias for SMAPI operations.
pub type SmapiResult<T> = Result<T, SmapiError>;
