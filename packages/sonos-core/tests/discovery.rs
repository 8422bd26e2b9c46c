mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sonos_core::sonos::discovery::{DiscoveryResult, SsdpSearcher, SubnetScanner};
use sonos_core::sonos::transport::HttpResponse;
use sonos_core::{Discoverer, DiscoveryOptions, Speaker};
use tokio::time::Instant;

use common::{device_description, soap_ok, ScriptedTransport, ZONE_GROUP_STATE};

struct FixedSsdp(Vec<&'static str>);

#[async_trait]
impl SsdpSearcher for FixedSsdp {
    async fn search(&self, _deadline: Instant) -> DiscoveryResult<Vec<String>> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}

struct NoScan;

#[async_trait]
impl SubnetScanner for NoScan {
    fn candidate_hosts(&self) -> Vec<Ipv4Addr> {
        Vec::new()
    }

    async fn probe(&self, _ip: Ipv4Addr, _port: u16, _timeout: Duration) -> bool {
        false
    }
}

#[tokio::test]
async fn discovered_speakers_are_sorted_by_name() {
    let http = Arc::new(ScriptedTransport::new());
    http.on(
        "http://192.168.1.11:1400/xml/device_description.xml",
        device_description("Kitchen", "RINCON_KITCHEN"),
    )
    .on(
        "http://192.168.1.10:1400/xml/device_description.xml",
        device_description("Bar", "RINCON_BAR"),
    )
    .on("GetZoneGroupState", HttpResponse::new(404, ""));

    let discoverer = Discoverer::with_components(
        http.clone(),
        Arc::new(FixedSsdp(vec![
            "http://192.168.1.11:1400/xml/device_description.xml",
            "http://192.168.1.10:1400/xml/device_description.xml",
        ])),
        Arc::new(NoScan),
    );
    let options = DiscoveryOptions {
        timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let devices = discoverer.discover(&options).await.unwrap();
    let found: Vec<(&str, &str)> = devices
        .iter()
        .map(|d| (d.name.as_str(), d.ip.as_str()))
        .collect();
    assert_eq!(found, [("Bar", "192.168.1.10"), ("Kitchen", "192.168.1.11")]);
}

#[tokio::test]
async fn room_resolves_to_its_group_coordinator() {
    let http = Arc::new(ScriptedTransport::new());
    http.on(
        "GetZoneGroupState",
        soap_ok("GetZoneGroupState", &[("ZoneGroupState", ZONE_GROUP_STATE)]),
    );

    let anchor = Speaker::new(Ipv4Addr::new(10, 0, 0, 2), http.clone());
    let topology = anchor.topology().await.unwrap();
    assert_eq!(topology.coordinator_ip_for_name("Office"), Some("10.0.0.1"));

    let coordinator = anchor.coordinator_for_room("Office").await.unwrap();
    assert_eq!(coordinator.ip(), Ipv4Addr::new(10, 0, 0, 1));
}
