use crate::server::{ProxyState, TokenTable, proxy_router, proxy_routes::relay_response};

use cam_relay_core::{
    CoreResult, FetchConfig, GuardPolicy, RateLimitConfig, RateLimiter, Resolver, UpstreamClient, UpstreamResponse,
    UrlGuard,
};

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    io,
    net::IpAddr,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use futures::{StreamExt, stream};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;
use uuid::Uuid;

const TOKEN: &str = "test-token";

/// Answers from a fixed table; unknown names fail like NXDOMAIN.
struct ScriptedResolver {
    answers: HashMap<String, Vec<IpAddr>>,
}

impl ScriptedResolver {
    #[allow(clippy::unwrap_used)]
    fn new(entries: &[(&str, &[&str])]) -> Self {
        let answers = entries
            .iter()
            .map(|(host, addrs)| (host.to_string(), addrs.iter().map(|a| a.parse().unwrap()).collect()))
            .collect();
        Self { answers }
    }
}

impl Resolver for ScriptedResolver {
    fn resolve(&self, host: &str, _port: u16) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send {
        let answer = self
            .answers
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"));
        async move { answer }
    }
}

fn state_with<R: Resolver>(guard: UrlGuard<R>, max_requests: u32) -> (ProxyState<R>, watch::Sender<bool>) {
    let mut tokens = BTreeMap::new();
    tokens.insert("dashboard".to_string(), TOKEN.to_string());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = ProxyState::new(
        TokenTable::new(&tokens),
        Arc::new(RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
        })),
        guard,
        UpstreamClient::new(FetchConfig {
            max_attempts: 1,
            ..FetchConfig::default()
        }),
        shutdown_rx,
    );

    (state, shutdown_tx)
}

fn router(max_requests: u32) -> (Router, watch::Sender<bool>) {
    let (state, shutdown_tx) = state_with(UrlGuard::new(GuardPolicy::default()), max_requests);
    (proxy_router(state), shutdown_tx)
}

fn scripted_router(entries: &[(&str, &[&str])]) -> (Router, watch::Sender<bool>) {
    let guard = UrlGuard::with_resolver(GuardPolicy::default(), ScriptedResolver::new(entries));
    let (state, shutdown_tx) = state_with(guard, 30);
    (proxy_router(state), shutdown_tx)
}

fn upstream(
    status: u16,
    content_type: Option<&str>,
    content_length: Option<u64>,
    chunks: Option<Vec<&'static [u8]>>,
) -> UpstreamResponse {
    UpstreamResponse {
        status,
        content_type: content_type.map(str::to_string),
        content_length,
        body: chunks.map(|chunks| {
            stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| CoreResult::Ok(Bytes::from_static(chunk))),
            )
            .boxed()
        }),
    }
}

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[allow(clippy::unwrap_used)]
fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[allow(clippy::unwrap_used)]
fn post(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/proxy")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[allow(clippy::unwrap_used)]
async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

#[allow(clippy::unwrap_used)]
async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// WHAT: Requests without a valid token are rejected before anything else
/// WHY: The proxy must not be an open relay
#[tokio::test]
async fn given_no_token_when_proxying_then_401() {
    // Given
    let (router, _shutdown) = router(30);

    // When
    let missing = send(&router, get("/proxy?url=http://example.com/", None)).await;
    let wrong = send(&router, get("/proxy?url=http://example.com/", Some("nope"))).await;

    // Then
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(wrong).await["error"], "unauthorized");
}

/// WHAT: Loopback and metadata targets are blocked with a reason code
/// WHY: Authenticated callers still must not reach the host or its neighbours
#[tokio::test]
async fn given_internal_targets_when_proxying_then_400_blocked() {
    // Given
    let (router, _shutdown) = router(30);

    // When
    let loopback = send(&router, get("/proxy?url=http://127.0.0.1:8080/", Some(TOKEN))).await;
    let metadata = send(&router, get("/proxy?url=http://169.254.169.254/", Some(TOKEN))).await;

    // Then
    assert_eq!(loopback.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(loopback).await["reason"], "loopback_address");
    assert_eq!(metadata.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(metadata).await["reason"], "link_local_address");
}

/// WHAT: A private LAN literal is reported as unreachable, not just blocked
/// WHY: The dashboard tells the user to set up port forwarding instead
#[tokio::test]
async fn given_lan_target_when_proxying_then_lan_unreachable() {
    // Given
    let (router, _shutdown) = router(30);

    // When
    let response = send(&router, get("/proxy?url=http://192.168.1.20/stream", Some(TOKEN))).await;

    // Then
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "lan_unreachable");
}

/// WHAT: The token may be passed as a query parameter
/// WHY: Image tags cannot send headers
#[tokio::test]
async fn given_query_token_when_proxying_then_authenticated() {
    // Given
    let (router, _shutdown) = router(30);

    // When
    let response = send(
        &router,
        get(&format!("/proxy?url=http://127.0.0.1/&token={TOKEN}"), None),
    )
    .await;

    // Then: Rejected by the guard, not by authentication
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// WHAT: Requests past the window allowance get 429 and Retry-After
/// WHY: One principal must not be able to saturate the proxy
#[tokio::test]
async fn given_exhausted_window_when_proxying_then_429_with_retry_after() {
    // Given
    let (router, _shutdown) = router(2);
    let uri = "/proxy?url=http://127.0.0.1/";

    // When
    let first = send(&router, get(uri, Some(TOKEN))).await;
    let second = send(&router, get(uri, Some(TOKEN))).await;
    let third = send(&router, get(uri, Some(TOKEN))).await;

    // Then
    assert_eq!(first.status(), StatusCode::BAD_REQUEST);
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = third
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    assert!((1..=60).contains(&retry_after));
}

/// WHAT: Malformed proxy requests are rejected with 400
/// WHY: Only GET and HEAD towards a parseable URL are ever relayed
#[tokio::test]
async fn given_malformed_requests_when_proxying_then_400() {
    // Given
    let (router, _shutdown) = router(30);

    // When
    let missing_url = send(&router, get("/proxy", Some(TOKEN))).await;
    let garbage_url = send(&router, get("/proxy?url=not%20a%20url", Some(TOKEN))).await;
    let bad_method = send(&router, post(r#"{"url": "http://example.com/", "method": "DELETE"}"#)).await;
    let bad_json = send(&router, post("{ nope")).await;
    let ftp = send(&router, post(r#"{"url": "ftp://example.com/"}"#)).await;

    // Then
    assert_eq!(missing_url.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(missing_url).await["error"], "invalid_url");
    assert_eq!(garbage_url.status(), StatusCode::BAD_REQUEST);
    assert_eq!(bad_method.status(), StatusCode::BAD_REQUEST);
    assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(bad_json).await["error"], "invalid_request");
    assert_eq!(ftp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(ftp).await["reason"], "unsupported_scheme");
}

/// WHAT: A hostname whose DNS answer includes loopback is blocked at the route
/// WHY: Rebinding a public name to the host must not open the proxy to it
#[tokio::test]
async fn given_hostname_resolving_to_loopback_when_proxying_then_400_resolved_to_private() {
    // Given: One answer public, one loopback
    let (router, _shutdown) = scripted_router(&[("cam.example.com", &["93.184.216.34", "127.0.0.1"])]);

    // When
    let response = send(&router, get("/proxy?url=http://cam.example.com/video.mjpg", Some(TOKEN))).await;

    // Then
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["reason"], "resolved_to_private");
}

/// WHAT: A hostname that does not resolve is an upstream failure with a hint
/// WHY: The dashboard distinguishes a dead DDNS name from a blocked target
#[tokio::test]
async fn given_unresolvable_hostname_when_proxying_then_502_dns() {
    // Given
    let (router, _shutdown) = scripted_router(&[]);

    // When
    let response = send(&router, get("/proxy?url=http://gone.example.com/", Some(TOKEN))).await;

    // Then
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "upstream_unreachable");
    assert_eq!(body["kind"], "dns");
}

/// WHAT: A relayed answer keeps status, content type and length, and disables caching
/// WHY: Browsers must not cache a live camera stream
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_upstream_stream_when_relaying_then_headers_forwarded_and_no_cache() {
    // Given
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let request_id = Uuid::new_v4();
    let answer = upstream(
        200,
        Some("multipart/x-mixed-replace; boundary=frame"),
        Some(6),
        Some(vec![b"abc", b"def"]),
    );

    // When
    let response = relay_response(answer, request_id, shutdown_rx);

    // Then
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "cache-control"),
        Some("no-cache, no-store, must-revalidate")
    );
    assert_eq!(header_str(&response, "pragma"), Some("no-cache"));
    assert_eq!(header_str(&response, "expires"), Some("0"));
    assert_eq!(
        header_str(&response, "content-type"),
        Some("multipart/x-mixed-replace; boundary=frame")
    );
    assert_eq!(header_str(&response, "content-length"), Some("6"));
    let expected_id = request_id.to_string();
    assert_eq!(header_str(&response, "x-request-id"), Some(expected_id.as_str()));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"abcdef");
}

/// WHAT: A HEAD answer carries the upstream status and headers with no body
/// WHY: HEAD is the dashboard's reachability check
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_head_answer_when_relaying_then_empty_body() {
    // Given
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let answer = upstream(401, Some("text/html"), None, None);

    // When
    let response = relay_response(answer, Uuid::new_v4(), shutdown_rx);

    // Then: Upstream status is forwarded, not remapped
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(header_str(&response, "content-type"), Some("text/html"));
    assert_eq!(header_str(&response, "pragma"), Some("no-cache"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}

/// WHAT: An endless relayed stream ends once shutdown is signalled
/// WHY: Open proxy streams must not hold the server up during shutdown
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_endless_stream_when_shutdown_signalled_then_body_ends() {
    // Given: One chunk then nothing, forever
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let endless = stream::iter([CoreResult::Ok(Bytes::from_static(b"frame"))])
        .chain(stream::pending())
        .boxed();
    let answer = UpstreamResponse {
        status: 200,
        content_type: Some("image/jpeg".to_string()),
        content_length: None,
        body: Some(endless),
    };
    let mut body = relay_response(answer, Uuid::new_v4(), shutdown_rx)
        .into_body()
        .into_data_stream();

    let first = tokio::time::timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"frame");

    // When
    shutdown_tx.send(true).unwrap();

    // Then
    let rest = tokio::time::timeout(Duration::from_secs(2), body.next()).await.unwrap();
    assert!(rest.is_none());
}
