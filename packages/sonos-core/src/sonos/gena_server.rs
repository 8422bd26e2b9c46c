//! GENA callback server and subscription handles.
//!
//! An [`EventListener`] runs a small axum server that accepts `NOTIFY`
//! requests from speakers, parses them and pushes [`GenaEvent`]s into a
//! bounded queue drained through an [`EventStream`]. Subscriptions hold the
//! listener alive; the server stops when the last owner drops it.
//!
//! Speakers may send the initial NOTIFY before the SUBSCRIBE response
//! reaches us. Such events are held per SID and delivered, in arrival
//! order, once the subscription is registered.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::any;
use axum::Router;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::gena_client::{GenaClient, GenaError, GenaResult};
use super::gena_parser::parse_notify_body;
use super::services::SonosService;
use super::transport::HttpTransport;
use crate::context::IpDetector;
use crate::protocol_constants::{
    GENA_EVENT_QUEUE_CAPACITY, GENA_PENDING_NOTIFY_LIMIT, GENA_PENDING_NOTIFY_TTL,
    GENA_SUBSCRIPTION_TIMEOUT_SECS, MAX_GENA_BODY_SIZE,
};

/// Path the speakers send NOTIFY requests to.
pub const CALLBACK_PATH: &str = "/notify";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// One parsed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenaEvent {
    pub sid: String,
    pub seq: Option<u64>,
    pub service: SonosService,
    pub variables: BTreeMap<String, String>,
}

/// A NOTIFY whose SID is not routable yet.
struct PendingNotify {
    received: Instant,
    seq: Option<u64>,
    variables: BTreeMap<String, String>,
}

/// SID routes plus NOTIFYs waiting for theirs.
#[derive(Default)]
struct Routing {
    routes: HashMap<String, SonosService>,
    pending: HashMap<String, Vec<PendingNotify>>,
    pending_len: usize,
}

impl Routing {
    /// Drops held NOTIFYs older than `ttl`.
    fn expire(&mut self, now: Instant, ttl: Duration) {
        let mut dropped = 0;
        self.pending.retain(|sid, held| {
            let before = held.len();
            held.retain(|n| now.duration_since(n.received) < ttl);
            if held.len() < before {
                log::debug!(
                    "[GENA] Dropping {} NOTIFY(s) for unknown SID {}",
                    before - held.len(),
                    sid
                );
            }
            dropped += before - held.len();
            !held.is_empty()
        });
        self.pending_len -= dropped;
    }

    /// Holds a NOTIFY until `sid` is routed. Returns false when full.
    fn hold(&mut self, sid: String, notify: PendingNotify, limit: usize, ttl: Duration) -> bool {
        self.expire(notify.received, ttl);
        if self.pending_len >= limit {
            return false;
        }
        self.pending.entry(sid).or_default().push(notify);
        self.pending_len += 1;
        true
    }

    /// Routes `sid` and returns the NOTIFYs held for it, oldest first.
    fn insert(&mut self, sid: &str, service: SonosService) -> Vec<PendingNotify> {
        self.routes.insert(sid.to_string(), service);
        let held = self.pending.remove(sid).unwrap_or_default();
        self.pending_len -= held.len();
        held
    }

    fn remove(&mut self, sid: &str) {
        self.routes.remove(sid);
        if let Some(held) = self.pending.remove(sid) {
            self.pending_len -= held.len();
        }
    }
}

/// State shared between the listener handle and the HTTP handler.
struct ListenerShared {
    routing: Mutex<Routing>,
    events: mpsc::Sender<GenaEvent>,
}

impl ListenerShared {
    fn new(events: mpsc::Sender<GenaEvent>) -> Self {
        Self {
            routing: Mutex::new(Routing::default()),
            events,
        }
    }

    /// Delivers a NOTIFY if its SID is routed, else holds it.
    fn dispatch(&self, sid: String, seq: Option<u64>, variables: BTreeMap<String, String>) {
        let mut routing = self.routing.lock();
        if let Some(&service) = routing.routes.get(&sid) {
            self.push(GenaEvent {
                sid,
                seq,
                service,
                variables,
            });
            return;
        }

        log::debug!("[GENA] Holding NOTIFY for unknown SID {}", sid);
        let notify = PendingNotify {
            received: Instant::now(),
            seq,
            variables,
        };
        if !routing.hold(sid, notify, GENA_PENDING_NOTIFY_LIMIT, GENA_PENDING_NOTIFY_TTL) {
            log::warn!("[GENA] Too many unrouted NOTIFYs, dropping one");
        }
    }

    /// Routes `sid` and delivers anything that arrived for it early.
    fn route(&self, sid: &str, service: SonosService) {
        let mut routing = self.routing.lock();
        for held in routing.insert(sid, service) {
            log::debug!("[GENA] Delivering early NOTIFY for {}", sid);
            self.push(GenaEvent {
                sid: sid.to_string(),
                seq: held.seq,
                service,
                variables: held.variables,
            });
        }
    }

    fn push(&self, event: GenaEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("[GENA] Event queue full, dropping event from {}", event.sid);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::trace!("[GENA] Event stream closed, discarding event");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handler
// ─────────────────────────────────────────────────────────────────────────────

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn handle_notify(State(shared): State<Arc<ListenerShared>>, req: Request<Body>) -> StatusCode {
    let (parts, body) = req.into_parts();

    if parts.method.as_str() != "NOTIFY" {
        log::debug!("[GENA] Rejecting {} on callback endpoint", parts.method);
        return StatusCode::METHOD_NOT_ALLOWED;
    }

    let Some(sid) = header_str(&parts.headers, "SID").map(str::to_string) else {
        log::warn!("[GENA] NOTIFY missing SID header");
        return StatusCode::BAD_REQUEST;
    };
    let seq = header_str(&parts.headers, "SEQ").and_then(|s| s.parse().ok());

    let body_bytes = match axum::body::to_bytes(body, MAX_GENA_BODY_SIZE).await {
        Ok(b) => b,
        Err(e) => {
            log::warn!("[GENA] Failed to read NOTIFY body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let variables = parse_notify_body(&String::from_utf8_lossy(&body_bytes));

    log::debug!(
        "[GENA] NOTIFY from {} (SEQ: {:?}) - {} variables",
        sid,
        seq,
        variables.len()
    );

    shared.dispatch(sid, seq, variables);
    StatusCode::OK
}

fn router(shared: Arc<ListenerShared>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, any(handle_notify))
        .with_state(shared)
}

// ─────────────────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────────────────

/// A running callback server.
pub struct EventListener {
    local_addr: SocketAddrV4,
    callback_url: String,
    shared: Arc<ListenerShared>,
    stream: Mutex<Option<mpsc::Receiver<GenaEvent>>>,
    shutdown: CancellationToken,
}

impl EventListener {
    /// Starts a callback server on the local address that routes to `target`.
    pub async fn bind(detector: &dyn IpDetector, target: Ipv4Addr) -> GenaResult<Arc<Self>> {
        let ip = detector
            .detect_for(target)
            .map_err(|e| GenaError::LocalAddress(e.to_string()))?;
        Self::bind_ip(ip).await
    }

    /// Starts a callback server on `ip` with a kernel-chosen port.
    pub async fn bind_ip(ip: Ipv4Addr) -> GenaResult<Arc<Self>> {
        let listener = tokio::net::TcpListener::bind(SocketAddrV4::new(ip, 0))
            .await
            .map_err(GenaError::Server)?;
        let local_addr = match listener.local_addr().map_err(GenaError::Server)? {
            SocketAddr::V4(v4) => v4,
            other => return Err(GenaError::LocalAddress(other.to_string())),
        };

        let (tx, rx) = mpsc::channel(GENA_EVENT_QUEUE_CAPACITY);
        let shared = Arc::new(ListenerShared::new(tx));

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(Arc::clone(&shared));
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                log::warn!("[GENA] Callback server stopped with error: {}", e);
            }
            log::debug!("[GENA] Callback server on {} stopped", local_addr);
        });

        let callback_url = format!("http://{}{}", local_addr, CALLBACK_PATH);
        log::info!("[GENA] Callback server listening on {}", callback_url);

        Ok(Arc::new(Self {
            local_addr,
            callback_url,
            shared,
            stream: Mutex::new(Some(rx)),
            shutdown,
        }))
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    #[must_use]
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Takes the event stream. Only the first call returns it.
    pub fn take_stream(&self) -> Option<EventStream> {
        self.stream.lock().take().map(|rx| EventStream { rx })
    }

    /// Subscribes to `service` on the speaker at `addr`.
    ///
    /// The SID is routable by the time this returns, and NOTIFYs that
    /// beat the SUBSCRIBE response have been delivered.
    pub async fn subscribe(
        self: &Arc<Self>,
        http: Arc<dyn HttpTransport>,
        addr: SocketAddrV4,
        service: SonosService,
    ) -> GenaResult<EventSubscription> {
        let response = GenaClient::new(http.as_ref())
            .subscribe(addr, service, &self.callback_url, GENA_SUBSCRIPTION_TIMEOUT_SECS)
            .await?;
        self.shared.route(&response.sid, service);

        Ok(EventSubscription {
            sid: response.sid,
            timeout_secs: response.timeout_secs,
            service,
            addr,
            http,
            listener: Arc::clone(self),
            released: false,
        })
    }

    fn forget(&self, sid: &str) {
        self.shared.routing.lock().remove(sid);
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

/// An active subscription. Release it with [`release`](Self::release);
/// dropping it unreleased sends a best-effort UNSUBSCRIBE in the background.
pub struct EventSubscription {
    sid: String,
    timeout_secs: u64,
    service: SonosService,
    addr: SocketAddrV4,
    http: Arc<dyn HttpTransport>,
    listener: Arc<EventListener>,
    released: bool,
}

impl EventSubscription {
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    #[must_use]
    pub fn service(&self) -> SonosService {
        self.service
    }

    #[must_use]
    pub fn speaker(&self) -> SocketAddrV4 {
        self.addr
    }

    /// Renews the subscription and records the granted timeout.
    pub async fn renew(&mut self) -> GenaResult<u64> {
        self.timeout_secs = GenaClient::new(self.http.as_ref())
            .renew(self.addr, self.service, &self.sid)
            .await?;
        Ok(self.timeout_secs)
    }

    /// Unsubscribes. The SID stops routing even if the request fails.
    pub async fn release(mut self) -> GenaResult<()> {
        self.released = true;
        self.listener.forget(&self.sid);
        GenaClient::new(self.http.as_ref())
            .unsubscribe(self.addr, self.service, &self.sid)
            .await
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.listener.forget(&self.sid);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("[GENA] No runtime to unsubscribe {}", self.sid);
            return;
        };
        let http = Arc::clone(&self.http);
        let (addr, service, sid) = (self.addr, self.service, std::mem::take(&mut self.sid));
        handle.spawn(async move {
            if let Err(e) = GenaClient::new(http.as_ref())
                .unsubscribe(addr, service, &sid)
                .await
            {
                log::warn!("[GENA] Best-effort unsubscribe of {} failed: {}", sid, e);
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream
// ─────────────────────────────────────────────────────────────────────────────

/// Consumer side of the event queue.
pub struct EventStream {
    rx: mpsc::Receiver<GenaEvent>,
}

impl EventStream {
    /// Waits for the next event. Returns None once the server has stopped.
    pub async fn recv(&mut self) -> Option<GenaEvent> {
        self.rx.recv().await
    }

    /// Like [`recv`](Self::recv) but returns None when `cancel` fires.
    pub async fn recv_until(&mut self, cancel: &CancellationToken) -> Option<GenaEvent> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedIpDetector;
    use async_trait::async_trait;
    use crate::sonos::transport::{HttpRequest, HttpResponse, TransportResult};
    use crate::sonos::utils::escape_xml;
    use crate::test_support::FakeTransport;

    fn notify_body() -> String {
        let inner = r#"<Event><InstanceID val="0"><TransportState val="STOPPED"/></InstanceID></Event>"#;
        format!(
            r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><LastChange>{}</LastChange></e:property></e:propertyset>"#,
            escape_xml(inner)
        )
    }

    async fn send(url: &str, method: &str, sid: Option<&str>) -> u16 {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let mut req = client
            .request(reqwest::Method::from_bytes(method.as_bytes()).unwrap(), url)
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SEQ", "0")
            .body(notify_body());
        if let Some(sid) = sid {
            req = req.header("SID", sid);
        }
        req.send().await.unwrap().status().as_u16()
    }

    #[tokio::test]
    async fn notify_routes_to_subscribed_service() {
        let listener = EventListener::bind(&FixedIpDetector(Ipv4Addr::LOCALHOST), Ipv4Addr::LOCALHOST)
            .await
            .unwrap();
        let mut stream = listener.take_stream().unwrap();
        assert!(listener.take_stream().is_none());

        let fake = Arc::new(FakeTransport::new());
        fake.respond_to(
            "SUBSCRIBE",
            HttpResponse::new(200, "")
                .with_header("SID", "uuid:sub-1")
                .with_header("TIMEOUT", "Second-1800"),
        );
        fake.respond_to("UNSUBSCRIBE", HttpResponse::new(200, ""));
        let speaker = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1400);
        let sub = listener
            .subscribe(fake.clone(), speaker, SonosService::AVTransport)
            .await
            .unwrap();
        assert_eq!(sub.sid(), "uuid:sub-1");

        assert_eq!(send(listener.callback_url(), "NOTIFY", Some("uuid:sub-1")).await, 200);
        let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.service, SonosService::AVTransport);
        assert_eq!(event.seq, Some(0));
        assert_eq!(
            event.variables.get("transport_state").map(String::as_str),
            Some("STOPPED")
        );

        sub.release().await.unwrap();
        assert_eq!(fake.keys(), vec!["SUBSCRIBE", "UNSUBSCRIBE"]);
    }

    #[tokio::test]
    async fn rejects_other_methods_and_missing_sid() {
        let listener = EventListener::bind_ip(Ipv4Addr::LOCALHOST).await.unwrap();
        assert_eq!(send(listener.callback_url(), "POST", Some("uuid:x")).await, 405);
        assert_eq!(send(listener.callback_url(), "NOTIFY", None).await, 400);
    }

    /// Answers SUBSCRIBE only after the speaker side has already sent the
    /// first NOTIFY for the new SID to the callback URL.
    struct NotifyFirstTransport {
        sid: &'static str,
    }

    #[async_trait]
    impl HttpTransport for NotifyFirstTransport {
        async fn execute(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
            let Some(callback) = request.header("CALLBACK") else {
                return Ok(HttpResponse::new(200, ""));
            };
            let url = callback.trim_start_matches('<').trim_end_matches('>');
            assert_eq!(send(url, "NOTIFY", Some(self.sid)).await, 200);
            Ok(HttpResponse::new(200, "")
                .with_header("SID", self.sid)
                .with_header("TIMEOUT", "Second-1800"))
        }
    }

    #[tokio::test]
    async fn notify_before_subscribe_returns_keeps_its_service() {
        let listener = EventListener::bind_ip(Ipv4Addr::LOCALHOST).await.unwrap();
        let mut stream = listener.take_stream().unwrap();

        let http = Arc::new(NotifyFirstTransport { sid: "uuid:early" });
        let speaker = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1400);
        let sub = listener
            .subscribe(http, speaker, SonosService::RenderingControl)
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.sid, "uuid:early");
        assert_eq!(event.service, SonosService::RenderingControl);
        assert_eq!(event.seq, Some(0));
        sub.release().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_sid_is_held_not_delivered() {
        let listener = EventListener::bind_ip(Ipv4Addr::LOCALHOST).await.unwrap();
        let mut stream = listener.take_stream().unwrap();
        assert_eq!(send(listener.callback_url(), "NOTIFY", Some("uuid:stray")).await, 200);
        assert!(stream.rx.try_recv().is_err());
        assert_eq!(listener.shared.routing.lock().pending_len, 1);

        listener.forget("uuid:stray");
        assert_eq!(listener.shared.routing.lock().pending_len, 0);
    }

    fn held(received: Instant, seq: u64) -> PendingNotify {
        PendingNotify {
            received,
            seq: Some(seq),
            variables: BTreeMap::new(),
        }
    }

    #[test]
    fn held_notifies_flush_in_order_and_expire() {
        let start = Instant::now();
        let ttl = Duration::from_secs(10);
        let mut routing = Routing::default();
        assert!(routing.hold("uuid:a".into(), held(start, 0), 4, ttl));
        assert!(routing.hold("uuid:a".into(), held(start, 1), 4, ttl));
        assert!(routing.hold("uuid:b".into(), held(start, 0), 4, ttl));

        let flushed: Vec<_> = routing
            .insert("uuid:a", SonosService::AVTransport)
            .iter()
            .map(|n| n.seq)
            .collect();
        assert_eq!(flushed, [Some(0), Some(1)]);
        assert_eq!(routing.pending_len, 1);

        // uuid:b is stale by the time the next stray arrives.
        assert!(routing.hold("uuid:c".into(), held(start + ttl, 0), 4, ttl));
        assert!(!routing.pending.contains_key("uuid:b"));
        assert_eq!(routing.pending_len, 1);
    }

    #[test]
    fn held_notifies_are_bounded() {
        let now = Instant::now();
        let ttl = Duration::from_secs(10);
        let mut routing = Routing::default();
        assert!(routing.hold("uuid:a".into(), held(now, 0), 2, ttl));
        assert!(routing.hold("uuid:b".into(), held(now, 0), 2, ttl));
        assert!(!routing.hold("uuid:c".into(), held(now, 0), 2, ttl));
        assert_eq!(routing.pending_len, 2);
    }

    #[test]
    fn full_queue_drops_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let shared = ListenerShared::new(tx);
        for i in 0..3 {
            shared.push(GenaEvent {
                sid: format!("uuid:{}", i),
                seq: Some(i),
                service: SonosService::AVTransport,
                variables: BTreeMap::new(),
            });
        }
        assert_eq!(rx.try_recv().unwrap().sid, "uuid:0");
        assert!(rx.try_recv().is_err());
    }
}
