//! Sonos speaker control and discovery.
//!
//! This module provides functionality for discovering and controlling Sonos speakers
//! on the local network using UPnP/SOAP protocols.
//!
//! # Module Structure
//!
//! - `transport` - HTTP transport seam, reqwest client and curl fallback
//! - `soap` - Envelope building, response classification, request builder
//! - `utils` - XML helpers shared by every parser
//! - `services` - UPnP service definitions (URNs, paths)
//! - `didl` - DIDL-Lite parsing and metadata templates
//! - `discovery` - SSDP discovery with subnet scan fallback
//! - `topology` - Zone group state parsing and lookups
//! - `playback` - AVTransport commands and queries
//! - `volume` - Group and per-speaker volume/mute control
//! - `content_directory` - Favorites, queue, radio and album art helpers
//! - `properties` - Household id and device properties
//! - `music_services` - Available music service listing
//! - `refs` - Spotify and Apple Music reference parsing
//! - `enqueue` - Candidate URI templates and the enqueue loop
//! - `grouping` - Group join/leave
//! - `gena_client` - GENA SUBSCRIBE/UNSUBSCRIBE
//! - `gena_parser` - NOTIFY body and LastChange parsing
//! - `gena_server` - Callback listener, subscriptions and event stream
//! - `speaker` - The `Speaker` handle tying everything together

pub mod content_directory;
pub mod didl;
pub mod discovery;
pub mod enqueue;
pub mod gena_client;
pub mod gena_parser;
pub mod gena_server;
pub mod grouping;
pub mod music_services;
pub mod playback;
pub mod properties;
pub mod refs;
pub mod services;
pub mod soap;
pub mod speaker;
pub mod topology;
pub mod transport;
pub mod utils;
pub mod volume;

// Re-export domain types
pub use didl::DidlItem;
pub use discovery::{Device, Discoverer, DiscoveryOptions};
pub use enqueue::EnqueueOptions;
pub use gena_server::{EventListener, EventStream, EventSubscription, GenaEvent};
pub use music_services::{AuthPolicy, MusicService};
pub use playback::{MediaInfo, PlayMode, PositionInfo, RepeatMode, TransportInfo, TransportSettings};
pub use refs::{AppleMusicRef, SpotifyRef};
pub use services::SonosService;
pub use soap::{SoapError, SoapTarget};
pub use speaker::Speaker;
pub use topology::{Group, Member, Topology};
pub use transport::{
    default_transport, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportConfig,
};
