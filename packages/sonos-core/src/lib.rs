//! Sonos Core - local-network controller library for Sonos zone players.
//!
//! The crate talks to speakers directly over UPnP: it discovers players,
//! reads the zone group topology, drives playback, volume and the queue,
//! enqueues Spotify and Apple Music content, receives GENA events and
//! authenticates against music services over SMAPI.
//!
//! # Architecture
//!
//! - [`sonos`]: Discovery, topology, UPnP bindings, enqueue and events
//! - [`smapi`]: Music service API client and account linking
//! - [`store`]: File-backed config, token and scene persistence
//! - [`context`]: Local IP detection for event callbacks
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! Every external effect sits behind a trait so callers and tests can swap
//! it out:
//!
//! - [`HttpTransport`](sonos::transport::HttpTransport): HTTP requests
//! - [`SsdpSearcher`](sonos::discovery::SsdpSearcher) and
//!   [`SubnetScanner`](sonos::discovery::SubnetScanner): discovery
//! - [`IpDetector`](context::IpDetector): Local IP detection
//! - [`SmapiTokenStore`](store::SmapiTokenStore) and the other stores
//!
//! The library never installs a logger; it logs through the `log` facade.

#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod protocol_constants;
pub mod smapi;
pub mod sonos;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at the crate root
pub use context::{FixedIpDetector, IpDetector, LocalIpDetector, NetworkError, RouteIpDetector};
pub use error::{ErrorCode, SonosError, SonosResult};
pub use utils::now_millis;

// Re-export Sonos types
pub use sonos::discovery::{Device, Discoverer, DiscoveryOptions};
pub use sonos::topology::Topology;
pub use sonos::transport::{default_transport, HttpTransport, TransportConfig};
pub use sonos::Speaker;

// Re-export SMAPI and store types
pub use smapi::{SmapiClient, SmapiError, TokenPair};
pub use store::scenes::{apply_scene, capture_scene};
pub use store::{Scene, SceneStore, SmapiTokenStore};
