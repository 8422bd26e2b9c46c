//! Centralized error types for the Sonos core library.
//!
//! Every subsystem defines its own `thiserror` enum next to the code that
//! raises it. This module gathers them into [`SonosError`] and gives each
//! a stable machine-readable code through [`ErrorCode`].

use thiserror::Error;

use crate::context::NetworkError;
use crate::smapi::SmapiError;
use crate::sonos::discovery::DiscoveryError;
use crate::sonos::gena_client::GenaError;
use crate::sonos::refs::RefError;
use crate::sonos::soap::SoapError;
use crate::sonos::topology::TopologyError;
use crate::sonos::transport::TransportError;
use crate::store::StoreError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a stable snake_case code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::Timeout(_) => "timeout",
            Self::BodyTooLarge(_) => "body_too_large",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Fallback(_) => "fallback_failed",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.code(),
            Self::HttpStatus(_, _) => "http_error_status",
            Self::UPnP { .. } => "upnp_error",
            Self::Fault(_) => "soap_fault",
            Self::Parse(_) => "soap_parse_error",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendSearch(_) => "ssdp_send_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::Transport(e) => e.code(),
            Self::HttpStatus(_) => "http_error_status",
            Self::InvalidDescription(_) => "not_sonos_device",
        }
    }
}

impl ErrorCode for TopologyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "no_speakers_found",
            Self::NotFound(_) => "speaker_not_found",
            Self::Ambiguous { .. } => "ambiguous_name",
        }
    }
}

impl ErrorCode for RefError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unrecognized { .. } => "unrecognized_ref",
            Self::UnsupportedKind { .. } => "unsupported_kind",
            Self::EmptyId { .. } => "invalid_argument",
        }
    }
}

impl ErrorCode for GenaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.code(),
            Self::SubscriptionFailed(_) => "gena_subscription_failed",
            Self::RenewalFailed(_) => "gena_renewal_failed",
            Self::UnsubscribeFailed(_) => "gena_unsubscribe_failed",
            Self::MissingSid => "gena_missing_sid",
            Self::LocalAddress(_) => "network_error",
            Self::Server(_) => "gena_server_failed",
        }
    }
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        "network_error"
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum SonosError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error(transparent)]
    Gena(#[from] GenaError),

    #[error(transparent)]
    Smapi(#[from] SmapiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    /// A required entity (speaker, UDN, service) is missing.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ErrorCode for SonosError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.code(),
            Self::Soap(e) => e.code(),
            Self::Discovery(e) => e.code(),
            Self::Topology(e) => e.code(),
            Self::Ref(e) => e.code(),
            Self::Gena(e) => e.code(),
            Self::Smapi(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Network(e) => e.code(),
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type aliases from their defining modules
pub use crate::smapi::SmapiResult;
pub use crate::sonos::discovery::DiscoveryResult;
pub use crate::sonos::gena_client::GenaResult;
pub use crate::sonos::soap::SoapResult;
pub use crate::store::StoreResult;

/// Convenient Result alias for crate-wide operations.
pub type SonosResult<T> = Result<T, SonosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upnp_errors_keep_their_code() {
        let err: SonosError = SoapError::UPnP {
            code: "711".into(),
            description: String::new(),
        }
        .into();
        assert_eq!(err.code(), "upnp_error");
        assert_eq!(err.to_string(), "UPnP error 711: ");
    }

    #[test]
    fn ambiguous_names_list_candidates() {
        let err: SonosError = TopologyError::Ambiguous {
            query: "room".into(),
            candidates: vec!["Bathroom".into(), "Living Room".into()],
        }
        .into();
        assert_eq!(err.code(), "ambiguous_name");
        assert!(err.to_string().contains("candidates: Bathroom, Living Room"));
    }

    #[test]
    fn transport_codes_pass_through_soap() {
        let err = SoapError::Transport(TransportError::Timeout("x".into()));
        assert_eq!(err.code(), "timeout");
    }
}
