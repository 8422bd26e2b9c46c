//! SSDP multicast search for Sonos zone players.
//!
//! One ephemeral IPv4 socket bound to `0.0.0.0` sends the M-SEARCH burst and
//! receives the unicast replies, since devices answer the sending port.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use super::types::{DiscoveryError, DiscoveryResult};
use crate::protocol_constants::{
    SONOS_SEARCH_TARGET, SSDP_MULTICAST_ADDR, SSDP_MX, SSDP_READ_TIMEOUT, SSDP_SEND_COUNT,
};

// ─────────────────────────────────────────────────────────────────────────────
// ASCII Case-Insensitive Helpers
// ─────────────────────────────────────────────────────────────────────────────
//
// HTTP headers are ASCII, so byte-level comparison avoids allocating during
// the response burst.

#[inline]
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

#[inline]
fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Format
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the M-SEARCH message.
pub fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        SSDP_MULTICAST_ADDR, mx, SONOS_SEARCH_TARGET
    )
}

/// Extracts the `LOCATION` header of an SSDP response from a zone player.
///
/// Returns None for responses that do not look like they came from Sonos.
pub fn parse_ssdp_location(response: &str) -> Option<String> {
    if !contains_ignore_ascii_case(response, "sonos")
        && !contains_ignore_ascii_case(response, "rincon")
        && !contains_ignore_ascii_case(response, "zoneplayer")
    {
        return None;
    }

    // Split at the first colon only so the URL keeps its own colons.
    response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, "location:"))
        .and_then(|l| l.find(':').map(|idx| l[idx + 1..].trim().to_string()))
        .filter(|l| !l.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Searcher
// ─────────────────────────────────────────────────────────────────────────────

/// Finds zone players on the local network.
#[async_trait]
pub trait SsdpSearcher: Send + Sync {
    /// Returns the unique `LOCATION` URLs seen before `deadline`, in arrival order.
    async fn search(&self, deadline: Instant) -> DiscoveryResult<Vec<String>>;
}

/// SSDP over IPv4 multicast.
#[derive(Debug, Default, Clone, Copy)]
pub struct MulticastSearcher;

fn create_socket() -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    // UPnP 1.0 recommends TTL 4 for SSDP multicast.
    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("[SSDP] Failed to set multicast TTL: {}", e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

#[async_trait]
impl SsdpSearcher for MulticastSearcher {
    async fn search(&self, deadline: Instant) -> DiscoveryResult<Vec<String>> {
        let socket = create_socket()?;
        let msg = build_msearch_message(SSDP_MX);

        for attempt in 0..SSDP_SEND_COUNT {
            socket
                .send_to(msg.as_bytes(), SSDP_MULTICAST_ADDR)
                .await
                .map_err(DiscoveryError::SendSearch)?;
            log::trace!("[SSDP] Sent M-SEARCH {}/{}", attempt + 1, SSDP_SEND_COUNT);
        }

        let mut seen = HashSet::new();
        let mut locations = Vec::new();
        let mut buf = [0u8; 2048];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining.min(SSDP_READ_TIMEOUT), socket.recv_from(&mut buf)).await {
                Ok(Ok((amt, src))) => {
                    let response = String::from_utf8_lossy(&buf[..amt]);
                    if let Some(location) = parse_ssdp_location(&response) {
                        if seen.insert(location.clone()) {
                            log::debug!("[SSDP] Response from {}: {}", src, location);
                            locations.push(location);
                        }
                    }
                }
                Ok(Err(e)) => log::warn!("[SSDP] Socket recv error: {}", e),
                // Per-read deadline; keep listening until the outer one.
                Err(_) => {}
            }
        }

        log::debug!("[SSDP] Search complete: {} unique location(s)", locations.len());
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msearch_message_has_required_headers() {
        let msg = build_msearch_message(1);
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(msg.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(msg.contains("MX: 1\r\n"));
        assert!(msg.contains("ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn location_is_extracted_case_insensitively() {
        let response = "HTTP/1.1 200 OK\r\nlocation: http://192.168.1.10:1400/xml/device_description.xml\r\nSERVER: Linux UPnP/1.0 Sonos/63.2\r\n\r\n";
        assert_eq!(
            parse_ssdp_location(response).as_deref(),
            Some("http://192.168.1.10:1400/xml/device_description.xml")
        );
    }

    #[test]
    fn non_sonos_responses_are_ignored() {
        let response = "HTTP/1.1 200 OK\r\nLOCATION: http://192.168.1.20:80/description.xml\r\nUSN: uuid:other\r\n\r\n";
        assert!(parse_ssdp_location(response).is_none());
    }

    #[test]
    fn ascii_helpers() {
        assert!(contains_ignore_ascii_case("SONOS Speaker", "sonos"));
        assert!(!contains_ignore_ascii_case("ab", "abc"));
        assert!(starts_with_ignore_ascii_case("LOCATION: x", "location:"));
    }
}
