//! Device description fetch and parsing.

use serde::Serialize;
use tokio::time::Instant;

use super::types::{DiscoveryError, DiscoveryResult};
use crate::protocol_constants::DEVICE_DESCRIPTION_PATH;
use crate::sonos::transport::{HttpRequest, HttpTransport};
use crate::sonos::utils::{extract_xml_text, strip_uuid_prefix};

/// The fields of `device_description.xml` this crate uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub room_name: String,
    /// UDN with the `uuid:` prefix stripped.
    pub udn: String,
    pub location: String,
}

/// Builds the description URL for a speaker.
#[must_use]
pub fn description_url(ip: &str, port: u16) -> String {
    format!("http://{}:{}{}", ip, port, DEVICE_DESCRIPTION_PATH)
}

/// Parses `/root/device/roomName` and `/root/device/UDN`.
///
/// Embedded devices carry their own UDN later in the document, so the
/// first occurrence is the root device's.
pub fn parse_device_description(xml: &str, location: &str) -> DiscoveryResult<DeviceDescription> {
    let udn = extract_xml_text(xml, "UDN")
        .map(|u| strip_uuid_prefix(&u).to_string())
        .unwrap_or_default();
    if udn.is_empty() {
        return Err(DiscoveryError::InvalidDescription(format!(
            "missing UDN at {}",
            location
        )));
    }
    let room_name = extract_xml_text(xml, "roomName")
        .map(|n| n.trim().to_string())
        .unwrap_or_default();

    Ok(DeviceDescription {
        room_name,
        udn,
        location: location.to_string(),
    })
}

/// Fetches and parses a device description from `location`.
pub async fn fetch_device_description(
    http: &dyn HttpTransport,
    location: &str,
    deadline: Option<Instant>,
) -> DiscoveryResult<DeviceDescription> {
    let response = http
        .execute(HttpRequest::get(location).with_deadline(deadline))
        .await?;
    if response.status != 200 {
        return Err(DiscoveryError::HttpStatus(response.status));
    }
    parse_device_description(&response.text(), location)
}
