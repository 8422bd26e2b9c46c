//! Shared types for Sonos speaker discovery.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::protocol_constants::{DEFAULT_DISCOVERY_TIMEOUT, SCAN_HOST_TIMEOUT};
use crate::sonos::topology::Member;
use crate::sonos::transport::TransportError;

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind the UDP socket used for M-SEARCH.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send an SSDP search.
    #[error("failed to send SSDP search: {0}")]
    SendSearch(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// Fetching a device description failed.
    #[error("device description request failed: {0}")]
    Transport(#[from] TransportError),

    /// The device description endpoint answered with a non-200 status.
    #[error("device description returned HTTP {0}")]
    HttpStatus(u16),

    /// The host answered but is not a usable Sonos device.
    #[error("invalid device description: {0}")]
    InvalidDescription(String),
}

/// Convenient Result alias for speaker discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// A discovered zone player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub ip: String,
    /// Room name.
    pub name: String,
    /// UDN with the `uuid:` prefix stripped.
    pub uuid: String,
    /// Device description URL.
    pub location: String,
}

impl From<&Member> for Device {
    fn from(member: &Member) -> Self {
        Self {
            ip: member.ip.clone(),
            name: member.name.clone(),
            uuid: member.uuid.clone(),
            location: member.location.clone(),
        }
    }
}

/// Options for [`Discoverer::discover`](super::Discoverer::discover).
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Overall SSDP window, also used as the scan budget.
    pub timeout: Duration,
    /// Whether bonded satellites (subs, surrounds) are returned.
    pub include_invisible: bool,
    /// Whether to scan local /24 subnets when SSDP finds nothing.
    pub scan_fallback: bool,
    /// Per-host connect timeout during the scan.
    pub scan_host_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            include_invisible: false,
            scan_fallback: true,
            scan_host_timeout: SCAN_HOST_TIMEOUT,
        }
    }
}

/// Virtual interface prefixes to filter out during discovery.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_interfaces_are_recognized() {
        assert!(is_virtual_interface("lo"));
        assert!(is_virtual_interface("docker0"));
        assert!(is_virtual_interface("veth1234"));
        assert!(!is_virtual_interface("eth0"));
        assert!(!is_virtual_interface("wlan0"));
    }

    #[test]
    fn default_options_hide_satellites() {
        let options = DiscoveryOptions::default();
        assert!(!options.include_invisible);
        assert!(options.scan_fallback);
        assert_eq!(options.timeout, Duration::from_secs(5));
    }
}
