//! Scripted HTTP transport and XML fixtures shared by unit tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::sonos::transport::{
    HttpRequest, HttpResponse, HttpTransport, TransportError, TransportResult,
};
use crate::sonos::utils::escape_xml;

type Scripted = TransportResult<HttpResponse>;

/// Records every request and answers from scripted responses.
///
/// Responses registered with [`respond_to`](Self::respond_to) are keyed by
/// the full URL, or else by the SOAP action name (from `SOAPACTION`), the
/// URL path for GET requests, or the method name otherwise. Each key holds
/// a queue whose last entry repeats once the earlier ones are used up.
/// Requests with no keyed response fall back to the FIFO filled by
/// [`push_response`](Self::push_response).
#[derive(Default)]
pub struct FakeTransport {
    requests: Mutex<Vec<HttpRequest>>,
    keyed: Mutex<HashMap<String, VecDeque<Scripted>>>,
    queue: Mutex<VecDeque<Scripted>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_to(&self, key: &str, response: HttpResponse) {
        self.keyed
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    pub fn fail_on(&self, key: &str, error: TransportError) {
        self.keyed
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(Err(error));
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.queue.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.queue.lock().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }

    /// Request keys in the order they were sent.
    pub fn keys(&self) -> Vec<String> {
        self.requests.lock().iter().map(request_key).collect()
    }

    /// Requests sent for the given key.
    pub fn requests_for(&self, key: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| request_key(r) == key)
            .cloned()
            .collect()
    }
}

/// Derives the routing key of a request.
pub fn request_key(request: &HttpRequest) -> String {
    if let Some(action) = request.header("SOAPACTION") {
        let action = action.trim_matches('"');
        return action.rsplit('#').next().unwrap_or(action).to_string();
    }
    if request.method == reqwest::Method::GET {
        return reqwest::Url::parse(&request.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| request.url.clone());
    }
    request.method.to_string()
}

fn clone_scripted(entry: &Scripted) -> Scripted {
    match entry {
        Ok(r) => Ok(r.clone()),
        Err(e) => Err(match e {
            TransportError::Timeout(m) => TransportError::Timeout(m.clone()),
            TransportError::BodyTooLarge(n) => TransportError::BodyTooLarge(*n),
            TransportError::InvalidRequest(m) => TransportError::InvalidRequest(m.clone()),
            other => TransportError::Fallback(other.to_string()),
        }),
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        let key = request_key(&request);
        let url = request.url.clone();
        self.requests.lock().push(request);

        {
            let mut keyed = self.keyed.lock();
            for candidate in [url, key.clone()] {
                if let Some(queue) = keyed.get_mut(&candidate) {
                    if queue.len() > 1 {
                        if let Some(entry) = queue.pop_front() {
                            return entry;
                        }
                    } else if let Some(entry) = queue.front() {
                        return clone_scripted(entry);
                    }
                }
            }
        }

        self.queue.lock().pop_front().unwrap_or_else(|| {
            Err(TransportError::InvalidRequest(format!(
                "no scripted response for {}",
                key
            )))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// A 200 SOAP response for `action` with the given output fields.
pub fn soap_ok(action: &str, fields: &[(&str, &str)]) -> HttpResponse {
    let mut inner = String::new();
    for (k, v) in fields {
        inner.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }
    HttpResponse::new(
        200,
        format!(
            r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:{action}Response xmlns:u="urn:test">{inner}</u:{action}Response></s:Body></s:Envelope>"#
        ),
    )
}

/// A 500 response carrying a UPnP error code.
pub fn upnp_fault(code: &str) -> HttpResponse {
    HttpResponse::new(
        500,
        format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>{code}</errorCode></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#
        ),
    )
}

/// A device description document.
pub fn device_description(room: &str, udn: &str) -> HttpResponse {
    HttpResponse::new(
        200,
        format!(
            r#"<?xml version="1.0"?><root xmlns="urn:schemas-upnp-org:device-1-0"><device><deviceType>urn:schemas-upnp-org:device:ZonePlayer:1</deviceType><roomName>{}</roomName><UDN>uuid:{}</UDN></device></root>"#,
            escape_xml(room),
            escape_xml(udn)
        ),
    )
}

/// Zone group state with a Living Room + Office group and a standalone Kitchen
/// whose bonded sub shares its room name.
pub const ZONE_GROUP_STATE: &str = r#"<ZoneGroupState><ZoneGroups><ZoneGroup Coordinator="RINCON_LR" ID="RINCON_LR:1"><ZoneGroupMember UUID="RINCON_LR" Location="http://10.0.0.1:1400/xml/device_description.xml" ZoneName="Living Room"/><ZoneGroupMember UUID="RINCON_OF" Location="http://10.0.0.2:1400/xml/device_description.xml" ZoneName="Office"/></ZoneGroup><ZoneGroup Coordinator="RINCON_KI" ID="RINCON_KI:7"><ZoneGroupMember UUID="RINCON_KI" Location="http://10.0.0.3:1400/xml/device_description.xml" ZoneName="Kitchen"><Satellite UUID="RINCON_SUB" Location="http://10.0.0.4:1400/xml/device_description.xml" ZoneName="Kitchen" Invisible="1"/></ZoneGroupMember></ZoneGroup></ZoneGroups></ZoneGroupState>"#;
