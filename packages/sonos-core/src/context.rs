//! Local address selection for callbacks the speakers must reach.
//!
//! The GENA callback server has to bind an address that the target speaker
//! can route back to. [`IpDetector`] picks it; the default implementation
//! asks the kernel which source address it would use for the speaker.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;

use crate::protocol_constants::ROUTE_PROBE_PORT;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),

    /// The detected address is not IPv4.
    #[error("Local address {0} is not IPv4")]
    NotIpv4(IpAddr),
}

/// Chooses the local IPv4 address a speaker can reach us at.
pub trait IpDetector: Send + Sync {
    /// Returns the local address used to talk to `target`.
    fn detect_for(&self, target: Ipv4Addr) -> Result<Ipv4Addr, NetworkError>;
}

/// Asks the routing table by connecting a UDP socket to the speaker.
///
/// Connecting a datagram socket sends nothing; it only fixes the source
/// address the kernel would use.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteIpDetector;

impl RouteIpDetector {
    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self)
    }
}

impl IpDetector for RouteIpDetector {
    fn detect_for(&self, target: Ipv4Addr) -> Result<Ipv4Addr, NetworkError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|e| NetworkError::Detection(e.to_string()))?;
        socket
            .connect(SocketAddrV4::new(target, ROUTE_PROBE_PORT))
            .map_err(|e| NetworkError::Detection(format!("no route to {}: {}", target, e)))?;
        match socket.local_addr() {
            Ok(addr) => match addr.ip() {
                IpAddr::V4(v4) if !v4.is_unspecified() => Ok(v4),
                IpAddr::V4(_) => Err(NetworkError::Detection("unspecified source address".into())),
                other => Err(NetworkError::NotIpv4(other)),
            },
            Err(e) => Err(NetworkError::Detection(e.to_string())),
        }
    }
}

/// Uses the host's primary interface address regardless of target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalIpDetector;

impl IpDetector for LocalIpDetector {
    fn detect_for(&self, _target: Ipv4Addr) -> Result<Ipv4Addr, NetworkError> {
        match local_ip_address::local_ip() {
            Ok(IpAddr::V4(v4)) => Ok(v4),
            Ok(other) => Err(NetworkError::NotIpv4(other)),
            Err(e) => Err(NetworkError::Detection(e.to_string())),
        }
    }
}

/// Always returns the configured address.
#[derive(Debug, Clone, Copy)]
pub struct FixedIpDetector(pub Ipv4Addr);

impl IpDetector for FixedIpDetector {
    fn detect_for(&self, _target: Ipv4Addr) -> Result<Ipv4Addr, NetworkError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_detector_uses_loopback_for_loopback() {
        let ip = RouteIpDetector.detect_for(Ipv4Addr::LOCALHOST).unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn fixed_detector_ignores_target() {
        let d = FixedIpDetector(Ipv4Addr::new(192, 168, 1, 5));
        assert_eq!(
            d.detect_for(Ipv4Addr::new(10, 0, 0, 1)).unwrap(),
            Ipv4Addr::new(192, 168, 1, 5)
        );
    }
}
