//! Low-level SOAP protocol implementation for UPnP/Sonos communication.
//!
//! This module handles envelope building, response parsing and UPnP fault
//! decoding. Typed bindings for individual services live in the sibling
//! modules (`playback`, `volume`, `content_directory`, ...).

use std::collections::BTreeMap;
use std::net::SocketAddrV4;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;
use tokio::time::Instant;

use super::services::SonosService;
use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use super::utils::{escape_xml, extract_xml_text, local_name, unescape_xml};
use crate::protocol_constants::{SOAP_ENCODING_STYLE, SOAP_ENVELOPE_NS};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with Sonos speakers.
#[derive(Debug, Error)]
pub enum SoapError {
    /// The HTTP exchange itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Speaker returned a non-success HTTP status without a recognizable fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Speaker returned a UPnP error inside a SOAP fault.
    #[error("UPnP error {code}: {description}")]
    UPnP { code: String, description: String },

    /// Speaker returned a SOAP fault without a UPnP error block.
    #[error("SOAP fault: {0}")]
    Fault(String),

    /// Response XML was malformed or missing an expected element.
    #[error("failed to parse SOAP response: {0}")]
    Parse(String),

    /// The caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// Returns the UPnP error code, if this is a UPnP error.
    #[must_use]
    pub fn upnp_code(&self) -> Option<&str> {
        match self {
            Self::UPnP { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Returns true if this is a UPnP error with one of the given codes.
    #[must_use]
    pub fn is_upnp_code(&self, codes: &[&str]) -> bool {
        self.upnp_code().is_some_and(|c| codes.contains(&c))
    }

    /// Returns true if the underlying transport timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Restricts a tag name to `[A-Za-z0-9_-]`.
fn sanitize_tag(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Builds a SOAP envelope for `action` on the service `urn`.
///
/// Arguments are emitted in lexicographic key order so the wire form is
/// deterministic. The envelope is a single line with no leading whitespace;
/// Sonos rejects XML with whitespace before the root element.
#[must_use]
pub fn build_envelope(urn: &str, action: &str, args: &BTreeMap<String, String>) -> String {
    let action = sanitize_tag(action);
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{}" s:encodingStyle="{}"><s:Body><u:{} xmlns:u="{}">"#,
        SOAP_ENVELOPE_NS,
        SOAP_ENCODING_STYLE,
        action,
        escape_xml(urn)
    );

    for (k, v) in args {
        let tag = sanitize_tag(k);
        body.push_str(&format!("<{tag}>{}</{tag}>", escape_xml(v)));
    }

    body.push_str(&format!("</u:{}></s:Body></s:Envelope>", action));
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Direct children of the single element inside `<soap:Body>`, by local name.
///
/// Values are entity-decoded once, so embedded documents such as
/// `Result` or `ZoneGroupState` come back as XML text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapResponse {
    fields: BTreeMap<String, String>,
}

impl SoapResponse {
    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns a field value, or a parse error naming the missing field.
    pub fn require(&self, name: &str) -> SoapResult<&str> {
        self.get(name)
            .ok_or_else(|| SoapError::Parse(format!("missing element <{}>", name)))
    }

    /// Returns a field value or `""`.
    #[must_use]
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    /// Parses a numeric field, failing when it is absent or not a number.
    pub fn require_u32(&self, name: &str) -> SoapResult<u32> {
        let raw = self.require(name)?;
        raw.trim()
            .parse()
            .map_err(|_| SoapError::Parse(format!("<{}> is not a number: {:?}", name, raw)))
    }

    /// Parses a numeric field, defaulting to 0 when absent or empty.
    #[must_use]
    pub fn u32_or_zero(&self, name: &str) -> u32 {
        self.get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Returns all fields.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// Parses a SOAP response body into its action-response fields.
///
/// # Errors
/// Returns `SoapError::Parse` if the XML is malformed or has no `Body`.
pub fn parse_response(xml: &str) -> SoapResult<SoapResponse> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut in_body = false;
    let mut in_action = false;
    let mut fields = BTreeMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if !in_body {
                    in_body = name == "Body";
                } else if !in_action {
                    in_action = true;
                } else {
                    let text = reader
                        .read_text(e.name())
                        .map_err(|err| SoapError::Parse(err.to_string()))?;
                    fields.insert(name, unescape_xml(&text));
                }
            }
            Ok(Event::Empty(e)) => {
                if in_action {
                    fields.insert(local_name(&e), String::new());
                } else if in_body {
                    // Action response with no output arguments.
                    break;
                }
            }
            Ok(Event::End(_)) if in_body => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(SoapError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !in_body {
        return Err(SoapError::Parse("missing soap Body".into()));
    }
    Ok(SoapResponse { fields })
}

/// Decodes a `<UPnPError>` block anywhere in `body`.
///
/// Matching is by local name, so namespace prefixes do not matter.
/// Returns `(errorCode, errorDescription)`.
#[must_use]
pub fn decode_upnp_fault(body: &str) -> Option<(String, String)> {
    let mut reader = Reader::from_str(body);
    let mut buf = Vec::new();
    let mut in_error = false;
    let mut code = None;
    let mut description = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == "UPnPError" {
                    in_error = true;
                } else if in_error && (name == "errorCode" || name == "errorDescription") {
                    let text = reader.read_text(e.name()).ok()?;
                    let value = unescape_xml(text.trim());
                    if name == "errorCode" {
                        code = Some(value);
                    } else {
                        description = value;
                    }
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"UPnPError" => break,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    code.filter(|c| !c.is_empty()).map(|c| (c, description))
}

/// Classifies a raw HTTP response from a control endpoint.
///
/// 200 parses as success. 500 with a `<UPnPError>` becomes a typed UPnP
/// error, any other 500 a generic fault, and every other status an HTTP error.
pub fn classify_response(response: &HttpResponse) -> SoapResult<SoapResponse> {
    let text = response.text();
    match response.status {
        200 => parse_response(&text),
        500 => {
            if let Some((code, description)) = decode_upnp_fault(&text) {
                return Err(SoapError::UPnP { code, description });
            }
            let fault = extract_xml_text(&text, "faultstring")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Unknown SOAP fault".to_string());
            Err(SoapError::Fault(fault))
        }
        status => Err(SoapError::HttpStatus(status, text)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Target
// ─────────────────────────────────────────────────────────────────────────────

/// Where a SOAP call goes: the transport, the speaker address and the
/// optional outer deadline.
#[derive(Clone, Copy)]
pub struct SoapTarget<'a> {
    pub http: &'a dyn HttpTransport,
    pub addr: SocketAddrV4,
    pub deadline: Option<Instant>,
}

impl<'a> SoapTarget<'a> {
    /// Creates a target with no deadline.
    #[must_use]
    pub fn new(http: &'a dyn HttpTransport, addr: SocketAddrV4) -> Self {
        Self {
            http,
            addr,
            deadline: None,
        }
    }

    /// Returns a copy carrying `deadline`.
    #[must_use]
    pub fn with_deadline(self, deadline: Option<Instant>) -> Self {
        Self { deadline, ..self }
    }

    /// Starts a request for `action` on `service`.
    #[must_use]
    pub fn request(&self, service: SonosService, action: &'a str) -> SoapRequestBuilder<'a> {
        SoapRequestBuilder::new(self.http, self.addr)
            .service(service)
            .action(action)
            .deadline(self.deadline)
    }

    /// Returns the speaker's IPv4 address.
    #[must_use]
    pub fn ip(&self) -> std::net::Ipv4Addr {
        *self.addr.ip()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for constructing and sending SOAP requests to Sonos speakers.
///
/// # Example
/// ```ignore
/// let response = SoapRequestBuilder::new(http, addr)
///     .service(SonosService::AVTransport)
///     .action("Play")
///     .instance_id()
///     .arg("Speed", "1")
///     .send()
///     .await?;
/// ```
pub struct SoapRequestBuilder<'a> {
    http: &'a dyn HttpTransport,
    addr: SocketAddrV4,
    service: Option<SonosService>,
    action: Option<&'a str>,
    args: BTreeMap<String, String>,
    deadline: Option<Instant>,
}

impl<'a> SoapRequestBuilder<'a> {
    /// Creates a new SOAP request builder targeting `addr`.
    #[must_use]
    pub fn new(http: &'a dyn HttpTransport, addr: SocketAddrV4) -> Self {
        Self {
            http,
            addr,
            service: None,
            action: None,
            args: BTreeMap::new(),
            deadline: None,
        }
    }

    /// Sets the Sonos service for this request.
    #[must_use]
    pub fn service(mut self, service: SonosService) -> Self {
        self.service = Some(service);
        self
    }

    /// Sets the SOAP action name.
    #[must_use]
    pub fn action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    /// Adds an argument to the SOAP request.
    #[must_use]
    pub fn arg(mut self, key: &str, value: impl Into<String>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// Adds the standard InstanceID="0" argument used by most Sonos actions.
    #[must_use]
    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", "0")
    }

    /// Sets the outer deadline passed down to the transport.
    #[must_use]
    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sends the SOAP request and returns the parsed response fields.
    ///
    /// # Errors
    /// Returns `SoapError` if the service or action is not set, or if the
    /// request fails.
    pub async fn send(self) -> SoapResult<SoapResponse> {
        let service = self
            .service
            .ok_or_else(|| SoapError::InvalidArgument("service not set".into()))?;
        let action = self
            .action
            .ok_or_else(|| SoapError::InvalidArgument("action not set".into()))?;

        let url = format!("http://{}{}", self.addr, service.control_path());
        let body = build_envelope(service.urn(), action, &self.args);

        log::info!("[SOAP] {} -> {} (body: {} bytes)", action, url, body.len());
        log::debug!("[SOAP] Request body: {}", body);

        let request = HttpRequest::post(url, body)
            .with_header("Content-Type", "text/xml; charset=\"utf-8\"")
            .with_header("SOAPACTION", format!("\"{}#{}\"", service.urn(), action))
            .with_deadline(self.deadline);

        let start = std::time::Instant::now();
        let response = self.http.execute(request).await;
        log::info!(
            "[SOAP] {} completed in {:?}: {:?}",
            action,
            start.elapsed(),
            response.as_ref().map(|r| r.status)
        );

        let response = response?;
        log::debug!("[SOAP] Response body: {}", response.text());
        classify_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{soap_ok, upnp_fault, FakeTransport};
    use std::net::Ipv4Addr;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn envelope_is_independent_of_argument_order() {
        let urn = SonosService::AVTransport.urn();
        let a = build_envelope(urn, "Seek", &args(&[("Unit", "REL_TIME"), ("InstanceID", "0"), ("Target", "0:00:00")]));
        let b = build_envelope(urn, "Seek", &args(&[("Target", "0:00:00"), ("InstanceID", "0"), ("Unit", "REL_TIME")]));
        assert_eq!(a, b);
        let instance = a.find("<InstanceID>").unwrap();
        let target = a.find("<Target>").unwrap();
        let unit = a.find("<Unit>").unwrap();
        assert!(instance < target && target < unit);
    }

    #[test]
    fn envelope_escapes_values_and_sanitizes_tags() {
        let body = build_envelope("urn:x", "Set", &args(&[("Bad<Tag>", "a & b")]));
        assert!(body.contains("<BadTag>a &amp; b</BadTag>"));
        assert!(body.starts_with("<?xml"));
        assert!(body.contains(r#"<u:Set xmlns:u="urn:x">"#));
    }

    #[test]
    fn response_fields_are_direct_children() {
        let xml = r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:GetVolumeResponse xmlns:u="urn:x"><CurrentVolume>42</CurrentVolume><Empty/></u:GetVolumeResponse></s:Body></s:Envelope>"#;
        let response = parse_response(xml).unwrap();
        assert_eq!(response.get("CurrentVolume"), Some("42"));
        assert_eq!(response.get("Empty"), Some(""));
        assert!(response.require("Missing").is_err());
    }

    #[test]
    fn response_keeps_embedded_xml_as_text() {
        let xml = r#"<soap:Envelope xmlns:soap="x"><soap:Body><u:BrowseResponse><Result>&lt;DIDL-Lite&gt;&lt;/DIDL-Lite&gt;</Result></u:BrowseResponse></soap:Body></soap:Envelope>"#;
        let response = parse_response(xml).unwrap();
        assert_eq!(response.get("Result"), Some("<DIDL-Lite></DIDL-Lite>"));
    }

    #[test]
    fn response_without_body_is_parse_error() {
        assert!(matches!(parse_response("<a/>"), Err(SoapError::Parse(_))));
    }

    #[test]
    fn upnp_fault_ignores_namespace_prefixes() {
        let body = r#"<s:Envelope><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><x:UPnPError xmlns:x="urn:schemas-upnp-org:control-1-0"><x:errorCode>711</x:errorCode><x:errorDescription>nope</x:errorDescription></x:UPnPError></detail></s:Fault></s:Body></s:Envelope>"#;
        assert_eq!(decode_upnp_fault(body), Some(("711".into(), "nope".into())));
    }

    #[test]
    fn classify_maps_statuses() {
        let fault = classify_response(&HttpResponse::new(500, "<Fault><faultstring>boom</faultstring></Fault>"));
        assert!(matches!(fault, Err(SoapError::Fault(msg)) if msg == "boom"));

        let status = classify_response(&HttpResponse::new(404, "missing"));
        assert!(matches!(status, Err(SoapError::HttpStatus(404, _))));

        let upnp = classify_response(&upnp_fault("701"));
        assert!(upnp.unwrap_err().is_upnp_code(&["701", "711"]));
    }

    #[tokio::test]
    async fn builder_sends_headers_and_envelope() {
        let fake = FakeTransport::new();
        fake.respond_to("GetVolume", soap_ok("GetVolume", &[("CurrentVolume", "17")]));

        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 1400);
        let response = SoapRequestBuilder::new(&fake, addr)
            .service(SonosService::RenderingControl)
            .action("GetVolume")
            .instance_id()
            .arg("Channel", "Master")
            .send()
            .await
            .unwrap();
        assert_eq!(response.get("CurrentVolume"), Some("17"));

        let request = fake.last_request().unwrap();
        assert_eq!(
            request.url,
            "http://192.168.1.10:1400/MediaRenderer/RenderingControl/Control"
        );
        assert_eq!(
            request.header("SOAPACTION"),
            Some("\"urn:schemas-upnp-org:service:RenderingControl:1#GetVolume\"")
        );
        assert!(request.body_text().contains("<Channel>Master</Channel><InstanceID>0</InstanceID>"));
    }

    #[tokio::test]
    async fn builder_requires_service_and_action() {
        let fake = FakeTransport::new();
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1400);
        let err = SoapRequestBuilder::new(&fake, addr)
            .action("Play")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, SoapError::InvalidArgument(_)));
        assert!(fake.requests().is_empty());
    }
}
