//! Scripted transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use sonos_core::sonos::transport::{
    HttpRequest, HttpResponse, HttpTransport, TransportError, TransportResult,
};

/// Answers requests from per-key response queues and records what was sent.
///
/// A request's key is its full URL if one was scripted, otherwise the SOAP
/// action after `#`. The last response of a queue repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<HttpRequest>>,
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, key: &str, response: HttpResponse) -> &Self {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().clone()
    }

    /// SOAP actions in the order they were sent.
    pub fn actions(&self) -> Vec<String> {
        self.sent.lock().iter().filter_map(soap_action).collect()
    }

    pub fn sent_action(&self, action: &str) -> Vec<HttpRequest> {
        self.sent
            .lock()
            .iter()
            .filter(|r| soap_action(r).as_deref() == Some(action))
            .cloned()
            .collect()
    }
}

fn soap_action(request: &HttpRequest) -> Option<String> {
    let value = request.header("SOAPACTION")?.trim_matches('"');
    Some(value.rsplit('#').next().unwrap_or(value).to_string())
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        let keys = [Some(request.url.clone()), soap_action(&request)];
        self.sent.lock().push(request);

        let mut responses = self.responses.lock();
        for key in keys.into_iter().flatten() {
            if let Some(queue) = responses.get_mut(&key) {
                let next = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(response) = next {
                    return Ok(response);
                }
            }
        }
        Err(TransportError::InvalidRequest("unscripted request".into()))
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn soap_ok(action: &str, fields: &[(&str, &str)]) -> HttpResponse {
    let inner: String = fields
        .iter()
        .map(|(k, v)| format!("<{k}>{}</{k}>", escape(v)))
        .collect();
    HttpResponse::new(
        200,
        format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:{action}Response xmlns:u="urn:test">{inner}</u:{action}Response></s:Body></s:Envelope>"#
        ),
    )
}

pub fn upnp_fault(code: &str) -> HttpResponse {
    HttpResponse::new(
        500,
        format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>{code}</errorCode></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#
        ),
    )
}

pub fn smapi_fault(code: &str, detail: &str) -> HttpResponse {
    HttpResponse::new(
        500,
        format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:{code}</faultcode><faultstring>{code}</faultstring><detail>{detail}</detail></s:Fault></s:Body></s:Envelope>"#
        ),
    )
}

pub fn device_description(room: &str, udn: &str) -> HttpResponse {
    HttpResponse::new(
        200,
        format!(
            r#"<?xml version="1.0"?><root xmlns="urn:schemas-upnp-org:device-1-0"><device><roomName>{room}</roomName><UDN>uuid:{udn}</UDN></device></root>"#
        ),
    )
}

pub const ZONE_GROUP_STATE: &str = r#"<ZoneGroupState><ZoneGroups><ZoneGroup Coordinator="RINCON_LR" ID="RINCON_LR:1"><ZoneGroupMember UUID="RINCON_LR" Location="http://10.0.0.1:1400/xml/device_description.xml" ZoneName="Living Room"/><ZoneGroupMember UUID="RINCON_OF" Location="http://10.0.0.2:1400/xml/device_description.xml" ZoneName="Office"/></ZoneGroup></ZoneGroups></ZoneGroupState>"#;
