//! MusicServices binding: the catalog of music services a household knows.

use std::fmt;
use std::str::FromStr;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};

use super::services::SonosService;
use super::soap::{SoapError, SoapResult, SoapTarget};
use super::utils::{get_xml_attr, local_name, parse_embedded};

/// How a music service authenticates SMAPI calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthPolicy {
    Anonymous,
    UserId,
    DeviceLink,
    AppLink,
}

impl AuthPolicy {
    /// Returns true if calls carry a `loginToken` block.
    #[must_use]
    pub fn needs_login_token(&self) -> bool {
        matches!(self, Self::DeviceLink | Self::AppLink)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::UserId => "UserId",
            Self::DeviceLink => "DeviceLink",
            Self::AppLink => "AppLink",
        }
    }
}

impl fmt::Display for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthPolicy {
    type Err = SoapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "" => Ok(Self::Anonymous),
            "userid" => Ok(Self::UserId),
            "devicelink" => Ok(Self::DeviceLink),
            "applink" => Ok(Self::AppLink),
            other => Err(SoapError::Parse(format!("unknown auth policy: {}", other))),
        }
    }
}

/// One entry of `ListAvailableServices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicService {
    /// Numeric id as sent by the speaker.
    pub id: String,
    pub name: String,
    pub auth: AuthPolicy,
    pub secure_uri: String,
    pub presentation_map_uri: Option<String>,
    pub manifest_uri: Option<String>,
}

impl MusicService {
    /// `id * 256 + 7`, the service type used in account descriptors.
    #[must_use]
    pub fn service_type(&self) -> Option<u64> {
        self.id.trim().parse::<u64>().ok().map(|id| id * 256 + 7)
    }
}

/// Parses the `<Services>` document of `AvailableServiceDescriptorList`.
///
/// Entries with an unknown auth policy are skipped with a warning.
pub fn parse_service_list(payload: &str) -> SoapResult<Vec<MusicService>> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }
    parse_embedded(payload, parse_service_document)
}

fn start_service(e: &BytesStart) -> MusicService {
    MusicService {
        id: get_xml_attr(e, b"Id").unwrap_or_default(),
        name: get_xml_attr(e, b"Name").unwrap_or_default(),
        auth: AuthPolicy::Anonymous,
        secure_uri: get_xml_attr(e, b"SecureUri").unwrap_or_default(),
        presentation_map_uri: None,
        manifest_uri: None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_service_document(xml: &str) -> SoapResult<Vec<MusicService>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut services = Vec::new();
    let mut current: Option<MusicService> = None;
    let mut skip_current = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = local_name(e);
                match name.as_str() {
                    "Service" => {
                        if let Some(done) = current.take().filter(|_| !skip_current) {
                            services.push(done);
                        }
                        current = Some(start_service(e));
                        skip_current = false;
                    }
                    "Policy" => {
                        if let Some(service) = current.as_mut() {
                            let raw = get_xml_attr(e, b"Auth").unwrap_or_default();
                            match raw.parse() {
                                Ok(auth) => service.auth = auth,
                                Err(err) => {
                                    log::warn!("[Sonos] Skipping service {}: {}", service.name, err);
                                    skip_current = true;
                                }
                            }
                        }
                    }
                    "PresentationMap" => {
                        if let Some(service) = current.as_mut() {
                            service.presentation_map_uri = non_empty(get_xml_attr(e, b"Uri"));
                        }
                    }
                    "Manifest" => {
                        if let Some(service) = current.as_mut() {
                            service.manifest_uri = non_empty(get_xml_attr(e, b"Uri"));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"Service" => {
                if let Some(done) = current.take().filter(|_| !skip_current) {
                    services.push(done);
                }
                skip_current = false;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SoapError::Parse(format!("service list: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    if let Some(done) = current.filter(|_| !skip_current) {
        services.push(done);
    }
    Ok(services)
}

/// Lists the music services available to the household.
pub async fn list_available_services(target: SoapTarget<'_>) -> SoapResult<Vec<MusicService>> {
    let response = target
        .request(SonosService::MusicServices, "ListAvailableServices")
        .send()
        .await?;
    parse_service_list(response.get_or_empty("AvailableServiceDescriptorList"))
}

/// Finds a service by id or case-insensitive name.
#[must_use]
pub fn find_service<'a>(services: &'a [MusicService], query: &str) -> Option<&'a MusicService> {
    let query = query.trim();
    services
        .iter()
        .find(|s| s.id == query)
        .or_else(|| services.iter().find(|s| s.name.eq_ignore_ascii_case(query)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sonos::utils::escape_xml;
    use crate::test_support::{soap_ok, FakeTransport};
    use std::net::{Ipv4Addr, SocketAddrV4};

    const SERVICES: &str = r#"<Services SchemaVersion="1"><Service Capabilities="2563" Id="9" MaxMessagingVersion="1" Name="Spotify" SecureUri="https://spotify.example/smapi" Uri="http://spotify.example/smapi" Version="1.1"><Policy Auth="AppLink" PollInterval="10"/><Presentation><Strings Uri="https://spotify.example/strings.xml" Version="1"/><PresentationMap Uri="https://spotify.example/pm.xml" Version="2"/></Presentation></Service><Service Id="254" Name="TuneIn" SecureUri="https://tunein.example/smapi" Version="1.1"><Policy Auth="Anonymous"/><Manifest Uri="https://tunein.example/manifest.json" Version="1"/></Service><Service Id="77" Name="Weird" SecureUri="https://weird.example"><Policy Auth="Telepathy"/></Service></Services>"#;

    #[test]
    fn parses_services_with_policies() {
        let services = parse_service_list(SERVICES).unwrap();
        assert_eq!(services.len(), 2);

        let spotify = &services[0];
        assert_eq!(spotify.id, "9");
        assert_eq!(spotify.auth, AuthPolicy::AppLink);
        assert_eq!(spotify.service_type(), Some(2311));
        assert_eq!(spotify.presentation_map_uri.as_deref(), Some("https://spotify.example/pm.xml"));
        assert_eq!(spotify.manifest_uri, None);

        let tunein = &services[1];
        assert_eq!(tunein.auth, AuthPolicy::Anonymous);
        assert_eq!(tunein.manifest_uri.as_deref(), Some("https://tunein.example/manifest.json"));
    }

    #[tokio::test]
    async fn list_unwraps_double_escaping() {
        let fake = FakeTransport::new();
        let once = escape_xml(SERVICES);
        fake.respond_to(
            "ListAvailableServices",
            soap_ok("ListAvailableServices", &[("AvailableServiceDescriptorList", &once)]),
        );
        let target = SoapTarget::new(&fake, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1400));
        let services = list_available_services(target).await.unwrap();
        assert_eq!(services.len(), 2);
        assert!(find_service(&services, "tunein").is_some());
        assert!(find_service(&services, "9").is_some());
    }
}
