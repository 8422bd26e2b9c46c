//! Subnet scan fallback for networks where multicast is filtered.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use local_ip_address::list_afinet_netifas;
use tokio::net::TcpStream;

use super::types::is_virtual_interface;

/// Enumerates and probes candidate speaker hosts.
#[async_trait]
pub trait SubnetScanner: Send + Sync {
    /// Hosts worth probing, in scan order.
    fn candidate_hosts(&self) -> Vec<Ipv4Addr>;

    /// Returns true if `ip:port` accepts a TCP connection within `timeout`.
    async fn probe(&self, ip: Ipv4Addr, port: u16, timeout: Duration) -> bool;
}

/// Scans the /24 of every local IPv4 interface over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpSubnetScanner;

/// Returns the 254 host addresses of the /24 containing `ip`, excluding `ip`.
pub fn subnet_hosts(ip: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> {
    let [a, b, c, _] = ip.octets();
    (1..=254u8)
        .map(move |d| Ipv4Addr::new(a, b, c, d))
        .filter(move |host| *host != ip)
}

fn local_interface_addrs() -> Vec<Ipv4Addr> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[Scan] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| match addr {
            IpAddr::V4(v4) if !v4.is_loopback() && !is_virtual_interface(&name) => {
                log::debug!("[Scan] Using interface {} ({})", name, v4);
                Some(v4)
            }
            _ => None,
        })
        .collect()
}

#[async_trait]
impl SubnetScanner for TcpSubnetScanner {
    fn candidate_hosts(&self) -> Vec<Ipv4Addr> {
        let local = local_interface_addrs();
        let mut prefixes = BTreeSet::new();
        let mut hosts = Vec::new();
        for ip in &local {
            let [a, b, c, _] = ip.octets();
            if prefixes.insert((a, b, c)) {
                hosts.extend(subnet_hosts(*ip).filter(|h| !local.contains(h)));
            }
        }
        hosts
    }

    async fn probe(&self, ip: Ipv4Addr, port: u16, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(SocketAddrV4::new(ip, port))).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_hosts_cover_slash_24_without_self() {
        let me = Ipv4Addr::new(192, 168, 1, 42);
        let hosts: Vec<_> = subnet_hosts(me).collect();
        assert_eq!(hosts.len(), 253);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 1, 254)));
        assert!(!hosts.contains(&me));
    }
}
