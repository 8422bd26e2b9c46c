//! GENA HTTP client for subscription operations.
//!
//! Handles SUBSCRIBE, renewal and UNSUBSCRIBE against a speaker's service
//! event endpoint. Notification handling lives in `gena_server`.

use std::net::SocketAddrV4;

use reqwest::Method;
use thiserror::Error;
use tokio::time::Instant;

use super::services::SonosService;
use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::protocol_constants::GENA_SUBSCRIPTION_TIMEOUT_SECS;

/// Errors raised by GENA subscription and callback handling.
#[derive(Debug, Error)]
pub enum GenaError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("subscription failed with HTTP {0}")]
    SubscriptionFailed(u16),

    #[error("renewal failed with HTTP {0}")]
    RenewalFailed(u16),

    #[error("unsubscribe failed with HTTP {0}")]
    UnsubscribeFailed(u16),

    #[error("speaker response has no SID header")]
    MissingSid,

    #[error("could not determine local address: {0}")]
    LocalAddress(String),

    #[error("callback server failed: {0}")]
    Server(#[source] std::io::Error),
}

/// Convenient Result alias for GENA operations.
pub type GenaResult<T> = Result<T, GenaError>;

/// Response from a successful SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponse {
    /// The subscription ID returned by the speaker.
    pub sid: String,
    /// Subscription lifetime granted by the speaker.
    pub timeout_secs: u64,
}

fn gena_method(name: &'static str) -> Method {
    // Only called with valid method tokens.
    Method::from_bytes(name.as_bytes()).unwrap_or(Method::POST)
}

/// Parses a `TIMEOUT` header value of the form `Second-N`.
#[must_use]
pub fn parse_timeout_header(value: &str) -> Option<u64> {
    let value = value.trim();
    let secs = value
        .strip_prefix("Second-")
        .or_else(|| value.strip_prefix("second-"))?;
    secs.trim().parse().ok()
}

fn timeout_secs(response: &HttpResponse) -> u64 {
    response
        .header("TIMEOUT")
        .and_then(parse_timeout_header)
        .unwrap_or(GENA_SUBSCRIPTION_TIMEOUT_SECS)
}

fn event_url(addr: SocketAddrV4, service: SonosService) -> String {
    format!("http://{}{}", addr, service.event_path())
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// HTTP client for GENA (UPnP eventing) operations.
#[derive(Clone, Copy)]
pub struct GenaClient<'a> {
    http: &'a dyn HttpTransport,
    deadline: Option<Instant>,
}

impl<'a> GenaClient<'a> {
    #[must_use]
    pub fn new(http: &'a dyn HttpTransport) -> Self {
        Self {
            http,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(self, deadline: Option<Instant>) -> Self {
        Self { deadline, ..self }
    }

    /// Creates a subscription that sends NOTIFY requests to `callback_url`.
    pub async fn subscribe(
        &self,
        addr: SocketAddrV4,
        service: SonosService,
        callback_url: &str,
        timeout_secs_requested: u64,
    ) -> GenaResult<SubscribeResponse> {
        let request = HttpRequest::new(gena_method("SUBSCRIBE"), event_url(addr, service))
            .with_header("CALLBACK", format!("<{}>", callback_url))
            .with_header("NT", "upnp:event")
            .with_header("TIMEOUT", format!("Second-{}", timeout_secs_requested))
            .with_deadline(self.deadline);

        let response = self.http.execute(request).await?;
        if !is_success(response.status) {
            return Err(GenaError::SubscriptionFailed(response.status));
        }

        let sid = response
            .header("SID")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(GenaError::MissingSid)?;
        let timeout_secs = timeout_secs(&response);

        log::info!(
            "[GENA] Subscribed to {} on {}: sid={}, timeout={}s",
            service.name(),
            addr,
            sid,
            timeout_secs
        );
        Ok(SubscribeResponse { sid, timeout_secs })
    }

    /// Renews a subscription and returns the granted timeout.
    pub async fn renew(&self, addr: SocketAddrV4, service: SonosService, sid: &str) -> GenaResult<u64> {
        let request = HttpRequest::new(gena_method("SUBSCRIBE"), event_url(addr, service))
            .with_header("SID", sid)
            .with_deadline(self.deadline);

        let response = self.http.execute(request).await?;
        if !is_success(response.status) {
            return Err(GenaError::RenewalFailed(response.status));
        }

        let granted = timeout_secs(&response);
        log::debug!("[GENA] Renewed {} on {}: {}s", sid, addr, granted);
        Ok(granted)
    }

    /// Cancels a subscription. HTTP 412 means the speaker already expired
    /// it and counts as success.
    pub async fn unsubscribe(&self, addr: SocketAddrV4, service: SonosService, sid: &str) -> GenaResult<()> {
        let request = HttpRequest::new(gena_method("UNSUBSCRIBE"), event_url(addr, service))
            .with_header("SID", sid)
            .with_deadline(self.deadline);

        let response = self.http.execute(request).await?;
        match response.status {
            s if is_success(s) => {
                log::debug!("[GENA] Unsubscribed {} on {}", sid, addr);
                Ok(())
            }
            412 => {
                log::debug!("[GENA] {} already expired on {}", sid, addr);
                Ok(())
            }
            s => Err(GenaError::UnsubscribeFailed(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use std::net::Ipv4Addr;

    fn addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1400)
    }

    #[test]
    fn timeout_header_parsing() {
        assert_eq!(parse_timeout_header("Second-1800"), Some(1800));
        assert_eq!(parse_timeout_header(" Second-60 "), Some(60));
        assert_eq!(parse_timeout_header("infinite"), None);
    }

    #[tokio::test]
    async fn subscribe_sends_gena_headers() {
        let fake = FakeTransport::new();
        fake.respond_to(
            "SUBSCRIBE",
            HttpResponse::new(200, "")
                .with_header("SID", "uuid:RINCON_1_sub0000001")
                .with_header("TIMEOUT", "Second-3600"),
        );

        let client = GenaClient::new(&fake);
        let sub = client
            .subscribe(addr(), SonosService::AVTransport, "http://10.0.0.9:3400/notify", 1800)
            .await
            .unwrap();
        assert_eq!(sub.sid, "uuid:RINCON_1_sub0000001");
        assert_eq!(sub.timeout_secs, 3600);

        let req = fake.last_request().unwrap();
        assert_eq!(req.method.as_str(), "SUBSCRIBE");
        assert_eq!(req.url, "http://10.0.0.1:1400/MediaRenderer/AVTransport/Event");
        assert_eq!(req.header("CALLBACK"), Some("<http://10.0.0.9:3400/notify>"));
        assert_eq!(req.header("NT"), Some("upnp:event"));
        assert_eq!(req.header("TIMEOUT"), Some("Second-1800"));
    }

    #[tokio::test]
    async fn subscribe_without_sid_fails() {
        let fake = FakeTransport::new();
        fake.respond_to("SUBSCRIBE", HttpResponse::new(200, ""));
        let err = GenaClient::new(&fake)
            .subscribe(addr(), SonosService::RenderingControl, "http://x/", 1800)
            .await
            .unwrap_err();
        assert!(matches!(err, GenaError::MissingSid));
    }

    #[tokio::test]
    async fn renew_sends_only_sid() {
        let fake = FakeTransport::new();
        fake.respond_to("SUBSCRIBE", HttpResponse::new(200, "").with_header("TIMEOUT", "Second-1800"));
        let granted = GenaClient::new(&fake)
            .renew(addr(), SonosService::AVTransport, "uuid:s1")
            .await
            .unwrap();
        assert_eq!(granted, 1800);
        let req = fake.last_request().unwrap();
        assert_eq!(req.header("SID"), Some("uuid:s1"));
        assert!(req.header("CALLBACK").is_none());
        assert!(req.header("NT").is_none());
    }

    #[tokio::test]
    async fn unsubscribe_treats_412_as_success() {
        let fake = FakeTransport::new();
        fake.respond_to("UNSUBSCRIBE", HttpResponse::new(412, ""));
        GenaClient::new(&fake)
            .unsubscribe(addr(), SonosService::AVTransport, "uuid:s1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_reports_other_failures() {
        let fake = FakeTransport::new();
        fake.respond_to("UNSUBSCRIBE", HttpResponse::new(500, ""));
        let err = GenaClient::new(&fake)
            .unsubscribe(addr(), SonosService::AVTransport, "uuid:s1")
            .await
            .unwrap_err();
        assert!(matches!(err, GenaError::UnsubscribeFailed(500)));
    }
}
