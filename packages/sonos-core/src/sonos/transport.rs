//! HTTP transport with an external-helper fallback.
//!
//! Every request this crate sends goes through [`HttpTransport`]. The default
//! stack is a keep-alive-free `reqwest` client wrapped in [`FallbackTransport`],
//! which re-issues timed-out requests against private-range speakers through
//! `curl`. Some network stacks time out against Sonos speakers that still
//! answer an external curl process.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::protocol_constants::{FALLBACK_DEFAULT_BUDGET, MAX_REQUEST_BODY_SIZE, SOAP_TIMEOUT};
use crate::utils::is_local_ipv4_host;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while moving bytes to and from a speaker or service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying HTTP client failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The request did not complete before its timeout or deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The request body exceeds the replay buffer.
    #[error("request body of {0} bytes exceeds the {MAX_REQUEST_BODY_SIZE} byte limit")]
    BodyTooLarge(usize),

    /// The request could not be built (bad URL, header or method).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The external fallback helper failed or produced unparseable output.
    #[error("fallback helper failed: {0}")]
    Fallback(String),
}

impl TransportError {
    /// Returns true if this error means the peer did not answer in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Convenient Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

/// A fully buffered HTTP request.
///
/// The body is held as [`Bytes`] so it can be replayed by the fallback helper.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Outer deadline of the operation this request belongs to.
    pub deadline: Option<Instant>,
}

impl HttpRequest {
    /// Creates a request with no headers and no body.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            deadline: None,
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request carrying `body`.
    #[must_use]
    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the outer deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Looks up a header value (ASCII case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the body as lossy UTF-8 text (empty when absent).
    #[must_use]
    pub fn body_text(&self) -> String {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    /// Returns the URL host, if the URL parses.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with the given status and text body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a header value (ASCII case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the body as lossy UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Performs one HTTP exchange.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the buffered response, whatever its status.
    async fn execute(&self, request: HttpRequest) -> TransportResult<HttpResponse>;
}

/// Replays a request through an out-of-process helper.
#[async_trait]
pub trait FallbackExecutor: Send + Sync {
    /// Executes `request` within `budget`.
    async fn execute(&self, request: &HttpRequest, budget: Duration)
        -> TransportResult<HttpResponse>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the default transport stack.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout of the HTTP client.
    pub timeout: Duration,
    /// Whether timed-out requests to private hosts are replayed through curl.
    pub fallback_enabled: bool,
    /// Upper bound of the fallback budget.
    pub fallback_budget: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: SOAP_TIMEOUT,
            fallback_enabled: true,
            fallback_budget: FALLBACK_DEFAULT_BUDGET,
        }
    }
}

/// Builds the default transport: reqwest, wrapped in the curl fallback when enabled.
///
/// # Errors
/// Returns an error if the HTTP client cannot be constructed.
pub fn default_transport(config: &TransportConfig) -> TransportResult<Arc<dyn HttpTransport>> {
    let primary: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config)?);
    if !config.fallback_enabled {
        return Ok(primary);
    }
    Ok(Arc::new(FallbackTransport::new(
        primary,
        Arc::new(CurlExecutor::default()),
        config.timeout,
        config.fallback_budget,
    )))
}

// ─────────────────────────────────────────────────────────────────────────────
// Reqwest Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Direct HTTP transport backed by `reqwest`.
///
/// Keep-alives are disabled, and private-range destinations never go
/// through a proxy.
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport from the given configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        let proxy = reqwest::Proxy::custom(|url| {
            let host = url.host_str()?;
            if is_local_ipv4_host(host) {
                return None;
            }
            env_proxy_for(url.scheme())
        });

        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .proxy(proxy)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }
}

/// Reads the conventional proxy environment variables for `scheme`.
fn env_proxy_for(scheme: &str) -> Option<reqwest::Url> {
    let candidates: &[&str] = if scheme == "https" {
        &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]
    } else {
        &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]
    };
    candidates
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .and_then(|v| reqwest::Url::parse(v.trim()).ok())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        if let Some(body) = &request.body {
            if body.len() > MAX_REQUEST_BODY_SIZE {
                return Err(TransportError::BodyTooLarge(body.len()));
            }
        }

        let timeout = effective_timeout(self.timeout, request.deadline);
        if timeout.is_zero() {
            return Err(TransportError::Timeout(format!(
                "deadline already passed for {}",
                request.url
            )));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body.clone() {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Clips the client timeout to whatever remains before `deadline`.
fn effective_timeout(client_timeout: Duration, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => client_timeout.min(deadline.saturating_duration_since(Instant::now())),
        None => client_timeout,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallback Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps a primary transport and replays timed-out private-range requests
/// through a [`FallbackExecutor`].
pub struct FallbackTransport {
    primary: Arc<dyn HttpTransport>,
    fallback: Arc<dyn FallbackExecutor>,
    client_timeout: Duration,
    default_budget: Duration,
}

impl FallbackTransport {
    /// Creates a new fallback wrapper.
    pub fn new(
        primary: Arc<dyn HttpTransport>,
        fallback: Arc<dyn FallbackExecutor>,
        client_timeout: Duration,
        default_budget: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            client_timeout,
            default_budget,
        }
    }
}

/// Computes the fallback budget: `min(client timeout, remaining deadline, default)`.
///
/// A zero client timeout means "unbounded" and is ignored.
#[must_use]
pub fn fallback_budget(
    client_timeout: Duration,
    deadline: Option<Instant>,
    default_budget: Duration,
) -> Duration {
    let mut budget = default_budget;
    if !client_timeout.is_zero() {
        budget = budget.min(client_timeout);
    }
    if let Some(deadline) = deadline {
        budget = budget.min(deadline.saturating_duration_since(Instant::now()));
    }
    budget
}

#[async_trait]
impl HttpTransport for FallbackTransport {
    async fn execute(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        if let Some(body) = &request.body {
            if body.len() > MAX_REQUEST_BODY_SIZE {
                return Err(TransportError::BodyTooLarge(body.len()));
            }
        }

        let err = match self.primary.execute(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if !err.is_timeout() {
            return Err(err);
        }

        let local = request.host().is_some_and(|h| is_local_ipv4_host(&h));
        if !local {
            return Err(err);
        }

        let budget = fallback_budget(self.client_timeout, request.deadline, self.default_budget);
        if budget.is_zero() {
            log::debug!(
                "[HTTP] No budget left for fallback on {} {}",
                request.method,
                request.url
            );
            return Err(err);
        }

        log::warn!(
            "[HTTP] {} {} timed out ({}), retrying via fallback helper with {:?} budget",
            request.method,
            request.url,
            err,
            budget
        );
        self.fallback.execute(&request, budget).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Curl Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Runs requests through an external `curl` binary.
pub struct CurlExecutor {
    program: String,
}

impl CurlExecutor {
    /// Creates an executor using the given program name or path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CurlExecutor {
    fn default() -> Self {
        Self::new("curl")
    }
}

#[async_trait]
impl FallbackExecutor for CurlExecutor {
    async fn execute(
        &self,
        request: &HttpRequest,
        budget: Duration,
    ) -> TransportResult<HttpResponse> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("--silent")
            .arg("--show-error")
            .arg("--include")
            .arg("--request")
            .arg(request.method.as_str())
            .arg("--max-time")
            .arg(format!("{:.3}", budget.as_secs_f64()))
            .arg("--noproxy")
            .arg("*");
        for (name, value) in &request.headers {
            cmd.arg("--header").arg(format!("{}: {}", name, value));
        }
        if request.body.is_some() {
            cmd.arg("--data-binary").arg("@-");
        }
        cmd.arg(&request.url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Fallback(format!("failed to spawn {}: {}", self.program, e)))?;

        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                if let Some(body) = &request.body {
                    stdin
                        .write_all(body)
                        .await
                        .map_err(|e| TransportError::Fallback(format!("failed to write body: {}", e)))?;
                }
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| TransportError::Fallback(e.to_string()))
        };

        // The body write counts against the budget. A small grace period lets
        // curl report its own timeout.
        let output = tokio::time::timeout(budget + Duration::from_millis(250), run)
            .await
            .map_err(|_| TransportError::Timeout(format!("fallback exceeded {:?}", budget)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // curl exit code 28 = operation timed out
            if output.status.code() == Some(28) {
                return Err(TransportError::Timeout(stderr));
            }
            return Err(TransportError::Fallback(stderr));
        }

        parse_raw_response(&output.stdout)
    }
}

/// Parses `curl --include` output into a response.
///
/// Interim 1xx responses other than 101 precede the final one and are skipped.
pub fn parse_raw_response(raw: &[u8]) -> TransportResult<HttpResponse> {
    let mut rest = raw;

    loop {
        let (head_len, sep_len) = find_header_end(rest)
            .ok_or_else(|| TransportError::Fallback("missing header terminator".into()))?;
        let head = String::from_utf8_lossy(&rest[..head_len]).into_owned();
        let body = &rest[head_len + sep_len..];

        let mut lines = head.lines();
        let status_line = lines
            .next()
            .ok_or_else(|| TransportError::Fallback("empty response".into()))?;
        let status = parse_status_line(status_line)?;

        if (100..200).contains(&status) && status != 101 {
            rest = body;
            continue;
        }

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        return Ok(HttpResponse {
            status,
            headers,
            body: Bytes::copy_from_slice(body),
        });
    }
}

fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, 2))
}

fn parse_status_line(line: &str) -> TransportResult<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(TransportError::Fallback(format!(
            "malformed status line: {:?}",
            line
        )));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| TransportError::Fallback(format!("malformed status line: {:?}", line)))
}
