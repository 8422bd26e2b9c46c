//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (UPnP, SSDP, GENA,
//! the Sonos SMAPI dialect) or observed from real households, and changing
//! them would break protocol compliance.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Speaker Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// TCP port every Sonos zone player serves UPnP control on.
pub const SONOS_PORT: u16 = 1400;

/// Path of the device description document.
pub const DEVICE_DESCRIPTION_PATH: &str = "/xml/device_description.xml";

// ─────────────────────────────────────────────────────────────────────────────
// SSDP
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port (protocol specification).
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// SSDP search target for Sonos ZonePlayer devices.
pub const SONOS_SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:ZonePlayer:1";

/// MX value (max response delay in seconds) sent in M-SEARCH.
pub const SSDP_MX: u64 = 1;

/// Number of M-SEARCH packets sent per discovery.
pub const SSDP_SEND_COUNT: usize = 3;

/// Per-read deadline while collecting SSDP responses.
///
/// Keeps the receive loop responsive to the outer deadline.
pub const SSDP_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Default overall discovery timeout.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-host connect timeout used by the subnet scan fallback.
pub const SCAN_HOST_TIMEOUT: Duration = Duration::from_millis(400);

// ─────────────────────────────────────────────────────────────────────────────
// HTTP/SOAP
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for SOAP HTTP requests.
///
/// 10 seconds is reasonable for LAN operations.
pub const SOAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default budget for the external curl fallback.
pub const FALLBACK_DEFAULT_BUDGET: Duration = Duration::from_secs(5);

/// Maximum buffered request body size (2 MiB).
pub const MAX_REQUEST_BODY_SIZE: usize = 2 * 1024 * 1024;

/// SOAP envelope namespace.
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// SOAP encoding style attribute value.
pub const SOAP_ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

// ─────────────────────────────────────────────────────────────────────────────
// GENA (UPnP General Event Notification Architecture)
// ─────────────────────────────────────────────────────────────────────────────

/// GENA subscription timeout requested from speaker (seconds).
pub const GENA_SUBSCRIPTION_TIMEOUT_SECS: u64 = 1800;

/// Maximum size of GENA notification body (bytes).
pub const MAX_GENA_BODY_SIZE: usize = 256 * 1024;

/// Capacity of the bounded NOTIFY event queue.
pub const GENA_EVENT_QUEUE_CAPACITY: usize = 64;

/// NOTIFYs held for SIDs whose SUBSCRIBE has not returned yet.
pub const GENA_PENDING_NOTIFY_LIMIT: usize = 32;

/// How long an unrouted NOTIFY is held before it is dropped.
pub const GENA_PENDING_NOTIFY_TTL: Duration = Duration::from_secs(10);

/// Port the speaker is "connected" to when detecting the local callback IP.
pub const ROUTE_PROBE_PORT: u16 = 1900;

// ─────────────────────────────────────────────────────────────────────────────
// Music Service Numbers
// ─────────────────────────────────────────────────────────────────────────────

/// Spotify service numbers, tried in order.
pub const SPOTIFY_SERVICE_NUMBERS: [u32; 2] = [2311, 3079];

/// Apple Music service number used in the metadata descriptor.
pub const APPLE_MUSIC_METADATA_SERVICE: u32 = 52231;

/// Apple Music service id used for URI routing (`sid=`).
pub const APPLE_MUSIC_URI_SERVICE: u32 = 204;

/// TuneIn descriptor used in radio metadata.
pub const TUNEIN_DESCRIPTOR: &str = "SA_RINCON65031_";

// ─────────────────────────────────────────────────────────────────────────────
// SMAPI
// ─────────────────────────────────────────────────────────────────────────────

/// SMAPI SOAP namespace.
pub const SMAPI_NS: &str = "http://www.sonos.com/Services/1.1";

/// Device provider string sent in every SMAPI credentials header.
pub const SMAPI_DEVICE_PROVIDER: &str = "Sonos";

/// Floor of the complete-auth polling interval.
pub const SMAPI_MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Ceiling of the complete-auth polling interval.
pub const SMAPI_MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Age after which an Apple Music user token without explicit expiry is stale.
pub const APPLE_MUSIC_TOKEN_MAX_AGE: Duration = Duration::from_secs(180 * 24 * 60 * 60);
