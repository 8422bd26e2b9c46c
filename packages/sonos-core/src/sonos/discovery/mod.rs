//! Zone player discovery.
//!
//! SSDP multicast is the primary path. The zone group state of one responder
//! is used as a second source of truth, since it also lists players on
//! subnets multicast cannot reach. When SSDP hears nothing, the local /24
//! subnets are scanned for port 1400 instead.
//!
//! # Module Structure
//!
//! - `types` - `Device`, `DiscoveryOptions`, `DiscoveryError`
//! - `ssdp` - M-SEARCH wire format and the multicast searcher
//! - `scan` - Subnet scan fallback
//! - `description` - Device description fetch and parsing

pub mod description;
pub mod scan;
pub mod ssdp;
pub mod types;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

pub use description::{description_url, fetch_device_description, DeviceDescription};
pub use scan::{SubnetScanner, TcpSubnetScanner};
pub use ssdp::{MulticastSearcher, SsdpSearcher};
pub use types::{Device, DiscoveryError, DiscoveryOptions, DiscoveryResult};

use crate::protocol_constants::SONOS_PORT;
use crate::sonos::topology::{fetch_topology, Topology};
use crate::sonos::transport::HttpTransport;
use crate::sonos::utils::extract_ip_from_location;

/// Discovers zone players through pluggable SSDP and scan components.
pub struct Discoverer {
    http: Arc<dyn HttpTransport>,
    ssdp: Arc<dyn SsdpSearcher>,
    scanner: Arc<dyn SubnetScanner>,
    port: u16,
}

impl Discoverer {
    /// Creates a discoverer using multicast SSDP and a TCP subnet scan.
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self::with_components(http, Arc::new(MulticastSearcher), Arc::new(TcpSubnetScanner))
    }

    /// Creates a discoverer from explicit components.
    pub fn with_components(
        http: Arc<dyn HttpTransport>,
        ssdp: Arc<dyn SsdpSearcher>,
        scanner: Arc<dyn SubnetScanner>,
    ) -> Self {
        Self {
            http,
            ssdp,
            scanner,
            port: SONOS_PORT,
        }
    }

    /// Overrides the speaker port (default 1400).
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Discovers zone players, sorted by (name, ip) and unique by ip.
    ///
    /// SSDP listens for `options.timeout`; description and topology fetches
    /// that follow share a second deadline of the same length. An empty
    /// result is not an error, even when SSDP could not run.
    pub async fn discover(&self, options: &DiscoveryOptions) -> DiscoveryResult<Vec<Device>> {
        let search_deadline = Instant::now() + options.timeout;
        let locations = match self.ssdp.search(search_deadline).await {
            Ok(locations) => locations,
            Err(e) => {
                log::warn!("[Discovery] SSDP search failed: {}", e);
                Vec::new()
            }
        };

        let deadline = Instant::now() + options.timeout;
        let found = self.describe_all(&locations, deadline).await;
        log::debug!(
            "[Discovery] SSDP: {} location(s), {} described",
            locations.len(),
            found.len()
        );

        let devices = if found.is_empty() {
            if options.scan_fallback {
                self.scan(options).await
            } else {
                Vec::new()
            }
        } else {
            self.merge_with_topology(found, options, deadline).await
        };

        let devices = sort_and_dedupe(devices);
        log::info!("[Discovery] Found {} device(s)", devices.len());
        Ok(devices)
    }

    /// Fetches the description of the speaker at `ip`.
    pub async fn describe(&self, ip: Ipv4Addr, deadline: Option<Instant>) -> DiscoveryResult<Device> {
        let location = description_url(&ip.to_string(), self.port);
        let desc = fetch_device_description(self.http.as_ref(), &location, deadline).await?;
        Ok(Device {
            ip: ip.to_string(),
            name: desc.room_name,
            uuid: desc.udn,
            location: desc.location,
        })
    }

    async fn describe_all(&self, locations: &[String], deadline: Instant) -> Vec<Device> {
        let fetches = locations.iter().map(|location| async move {
            let ip = extract_ip_from_location(location)?;
            match fetch_device_description(self.http.as_ref(), location, Some(deadline)).await {
                Ok(desc) => Some(Device {
                    ip,
                    name: desc.room_name,
                    uuid: desc.udn,
                    location: desc.location,
                }),
                Err(e) => {
                    log::debug!("[Discovery] Skipping {}: {}", location, e);
                    None
                }
            }
        });
        futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn merge_with_topology(
        &self,
        found: Vec<Device>,
        options: &DiscoveryOptions,
        deadline: Instant,
    ) -> Vec<Device> {
        let Some(addr) = self.addr_of(&found[0].ip) else {
            return found;
        };
        match fetch_topology(self.http.as_ref(), addr, Some(deadline)).await {
            Ok(topology) => merge_devices(found, &topology, options.include_invisible),
            Err(e) => {
                log::warn!("[Discovery] Topology fetch from {} failed: {}", addr, e);
                found
            }
        }
    }

    async fn scan(&self, options: &DiscoveryOptions) -> Vec<Device> {
        let hosts = self.scanner.candidate_hosts();
        if hosts.is_empty() {
            return Vec::new();
        }
        log::info!("[Discovery] SSDP found nothing, scanning {} host(s)", hosts.len());

        let deadline = Instant::now() + options.timeout;
        let mut probes: FuturesUnordered<_> = hosts
            .into_iter()
            .map(|ip| self.probe_host(ip, options.scan_host_timeout, deadline))
            .collect();

        // Remaining probes are dropped with the stream on first success.
        let first = async {
            while let Some(result) = probes.next().await {
                if result.is_some() {
                    return result;
                }
            }
            None
        };
        let Some(device) = tokio::time::timeout_at(deadline, first).await.ok().flatten() else {
            log::info!("[Discovery] Subnet scan found no speakers");
            return Vec::new();
        };
        log::info!("[Discovery] Subnet scan found {} ({})", device.name, device.ip);

        let Some(addr) = self.addr_of(&device.ip) else {
            return vec![device];
        };
        match fetch_topology(self.http.as_ref(), addr, Some(deadline)).await {
            Ok(topology) => topology_devices(&topology, options.include_invisible),
            Err(e) => {
                log::warn!("[Discovery] Topology fetch from {} failed: {}", addr, e);
                vec![device]
            }
        }
    }

    async fn probe_host(&self, ip: Ipv4Addr, timeout: Duration, deadline: Instant) -> Option<Device> {
        if !self.scanner.probe(ip, self.port, timeout).await {
            return None;
        }
        self.describe(ip, Some(deadline)).await.ok()
    }

    fn addr_of(&self, ip: &str) -> Option<SocketAddrV4> {
        ip.parse().ok().map(|ip| SocketAddrV4::new(ip, self.port))
    }
}

/// Devices listed by a topology, optionally including bonded satellites.
pub fn topology_devices(topology: &Topology, include_invisible: bool) -> Vec<Device> {
    topology
        .members()
        .filter(|m| include_invisible || m.is_visible)
        .filter(|m| !m.ip.is_empty())
        .map(Device::from)
        .collect()
}

/// Combines the SSDP set with the topology-derived set.
///
/// The larger set wins; on a tie the two are unioned by ip without
/// overwriting SSDP entries. SSDP responders the topology marks invisible
/// are dropped unless `include_invisible`.
pub fn merge_devices(ssdp: Vec<Device>, topology: &Topology, include_invisible: bool) -> Vec<Device> {
    let hidden: HashSet<&str> = if include_invisible {
        HashSet::new()
    } else {
        topology
            .members()
            .filter(|m| !m.is_visible)
            .map(|m| m.uuid.as_str())
            .collect()
    };
    let ssdp: Vec<Device> = ssdp
        .into_iter()
        .filter(|d| !hidden.contains(d.uuid.as_str()))
        .collect();
    let from_topology = topology_devices(topology, include_invisible);

    match ssdp.len().cmp(&from_topology.len()) {
        Ordering::Less => from_topology,
        Ordering::Greater => ssdp,
        Ordering::Equal => {
            let mut merged = ssdp;
            for device in from_topology {
                if !merged.iter().any(|d| d.ip == device.ip) {
                    merged.push(device);
                }
            }
            merged
        }
    }
}

/// Sorts by (name, ip) and keeps the first device per ip.
pub fn sort_and_dedupe(mut devices: Vec<Device>) -> Vec<Device> {
    devices.sort_by(|a, b| (a.name.as_str(), a.ip.as_str()).cmp(&(b.name.as_str(), b.ip.as_str())));
    let mut seen = HashSet::new();
    devices.retain(|d| seen.insert(d.ip.clone()));
    devices
}
