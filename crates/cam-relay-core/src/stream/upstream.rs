//! Upstream camera fetcher used by the streaming proxy.

use crate::{CoreResult, RelayError, StreamTarget, UpstreamErrorKind};

use std::{error::Error as StdError, io, time::Duration};

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{Client, Method, redirect};
use tracing::{debug, instrument, warn};

/// Largest piece forwarded to the caller in one write (64 KiB).
pub const MAX_RELAY_CHUNK: usize = 64 * 1024;

/// A boxed stream of body bytes.
pub type ByteStream = BoxStream<'static, CoreResult<Bytes>>;

/// Timeouts and retry policy for upstream requests.
#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    /// TCP/TLS connect deadline.
    pub connect_timeout: Duration,
    /// Whole-request deadline for `HEAD` probes.
    pub head_timeout: Duration,
    /// Deadline for response headers on streaming `GET`. The body itself is
    /// unbounded.
    pub stream_header_timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff increment per attempt.
    pub backoff_step: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            head_timeout: Duration::from_secs(5),
            stream_header_timeout: Duration::from_secs(15),
            max_attempts: 3,
            backoff_step: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(2),
        }
    }
}

/// Proxied request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    /// Streaming body.
    Get,
    /// Reachability probe.
    Head,
}

impl FetchMethod {
    /// Parse a case-insensitive method name; only `GET` and `HEAD` exist.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(FetchMethod::Get),
            "HEAD" => Some(FetchMethod::Head),
            _ => None,
        }
    }
}

impl From<FetchMethod> for Method {
    fn from(method: FetchMethod) -> Self {
        match method {
            FetchMethod::Get => Method::GET,
            FetchMethod::Head => Method::HEAD,
        }
    }
}

/// Response headers plus (for `GET`) the live body.
pub struct UpstreamResponse {
    /// Upstream HTTP status, forwarded as-is.
    pub status: u16,
    /// Upstream `content-type`, if any.
    pub content_type: Option<String>,
    /// Upstream `content-length`, if any.
    pub content_length: Option<u64>,
    /// Body stream; `None` for `HEAD`.
    pub body: Option<ByteStream>,
}

/// Capped incremental backoff: `min(step * attempt, cap)`.
pub fn retry_delay(attempt: u32, step: Duration, cap: Duration) -> Duration {
    step.saturating_mul(attempt).min(cap)
}

/// HTTP client for upstream camera requests.
pub struct UpstreamClient {
    config: FetchConfig,
}

impl UpstreamClient {
    /// Client with the given policy.
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    /// The active policy.
    pub fn config(&self) -> FetchConfig {
        self.config
    }

    /// Fetch `target`, retrying connection-level failures only.
    ///
    /// Upstream error statuses are returned as responses, never retried.
    #[instrument(skip(self, target), fields(host = %target.host, port = target.port))]
    pub async fn fetch(&self, target: &StreamTarget, method: FetchMethod) -> CoreResult<UpstreamResponse> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(target, method).await {
                Ok(response) => {
                    debug!(attempt, status = response.status, "Upstream responded");
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = retry_delay(attempt, self.config.backoff_step, self.config.backoff_cap);
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Upstream attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, target: &StreamTarget, method: FetchMethod) -> CoreResult<UpstreamResponse> {
        let client = self.client_for(target)?;
        let deadline = match method {
            FetchMethod::Head => self.config.head_timeout,
            FetchMethod::Get => self.config.stream_header_timeout,
        };

        let response = tokio::time::timeout(
            deadline,
            client.request(method.into(), target.url.clone()).send(),
        )
        .await
        .map_err(|_| {
            RelayError::upstream(
                UpstreamErrorKind::Timeout,
                format!("no response within {}ms", deadline.as_millis()),
            )
        })?
        .map_err(|e| RelayError::upstream(classify_reqwest_error(&e), e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let body = match method {
            FetchMethod::Head => None,
            FetchMethod::Get => Some(cap_chunks(
                response
                    .bytes_stream()
                    .map(|chunk| {
                        chunk.map_err(|e| RelayError::upstream(classify_reqwest_error(&e), e.to_string()))
                    })
                    .boxed(),
                MAX_RELAY_CHUNK,
            )),
        };

        Ok(UpstreamResponse {
            status,
            content_type,
            content_length,
            body,
        })
    }

    /// Build a client pinned to the addresses the guard already approved,
    /// so the connection cannot be steered by a second DNS answer.
    /// Redirects are never followed; a redirect could point anywhere.
    fn client_for(&self, target: &StreamTarget) -> CoreResult<Client> {
        let mut builder = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .redirect(redirect::Policy::none());

        if !target.resolved.is_empty() {
            builder = builder.resolve_to_addrs(&target.host, &target.resolved);
        }

        builder
            .build()
            .map_err(|e| RelayError::upstream(UpstreamErrorKind::Connect, e.to_string()))
    }
}

/// Split any chunk larger than `window` into window-sized slices so no
/// single forwarded piece exceeds the cap. Slicing `Bytes` does not copy.
pub fn cap_chunks(input: ByteStream, window: usize) -> ByteStream {
    let window = window.max(1);
    input
        .flat_map(move |item| {
            let pieces: Vec<CoreResult<Bytes>> = match item {
                Ok(chunk) if chunk.len() > window => (0..chunk.len())
                    .step_by(window)
                    .map(|start| Ok(chunk.slice(start..(start + window).min(chunk.len()))))
                    .collect(),
                other => vec![other],
            };
            futures::stream::iter(pieces)
        })
        .boxed()
}

/// Map a reqwest failure onto an upstream subtype by walking its source
/// chain for the underlying IO error.
pub(crate) fn classify_reqwest_error(err: &reqwest::Error) -> UpstreamErrorKind {
    if err.is_timeout() {
        return UpstreamErrorKind::Timeout;
    }
    if let Some(status) = err.status() {
        return UpstreamErrorKind::Status(status.as_u16());
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return UpstreamErrorKind::Refused,
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => return UpstreamErrorKind::Reset,
                io::ErrorKind::TimedOut => return UpstreamErrorKind::Timeout,
                _ => {}
            }
        }
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("failed to lookup") || text.contains("resolve") {
            return UpstreamErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return UpstreamErrorKind::Tls;
        }
        source = cause.source();
    }

    if err.is_body() || err.is_decode() {
        UpstreamErrorKind::Reset
    } else {
        UpstreamErrorKind::Connect
    }
}

