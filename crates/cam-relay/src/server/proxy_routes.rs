//! Authenticated, rate-limited, SSRF-guarded streaming proxy.

use crate::{
    AppError, AppResult,
    server::{TokenTable, no_cache_headers, shutdown_requested},
};

use cam_relay_core::{
    FetchMethod, RateLimiter, RelayError, Resolver, SystemResolver, UpstreamClient, UpstreamResponse, UrlGuard,
};

use std::{panic::Location, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use error_location::ErrorLocation;
use futures::{StreamExt, future};
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, instrument};
use uuid::Uuid;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for the proxy router.
pub struct ProxyState<R: Resolver = SystemResolver> {
    pub(crate) tokens: Arc<TokenTable>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) guard: Arc<UrlGuard<R>>,
    pub(crate) client: Arc<UpstreamClient>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

// Derived Clone would require `R: Clone`.
impl<R: Resolver> Clone for ProxyState<R> {
    fn clone(&self) -> Self {
        Self {
            tokens: Arc::clone(&self.tokens),
            limiter: Arc::clone(&self.limiter),
            guard: Arc::clone(&self.guard),
            client: Arc::clone(&self.client),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<R: Resolver> ProxyState<R> {
    /// Bundle the proxy's collaborators.
    pub fn new(
        tokens: TokenTable,
        limiter: Arc<RateLimiter>,
        guard: UrlGuard<R>,
        client: UpstreamClient,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tokens: Arc::new(tokens),
            limiter,
            guard: Arc::new(guard),
            client: Arc::new(client),
            shutdown,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProxyQuery {
    url: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProxyBody {
    url: String,
    #[serde(default)]
    method: Option<String>,
}

/// Routes: `GET`/`HEAD /proxy?url=..` and `POST /proxy {url, method}`.
pub fn proxy_router<R: Resolver + 'static>(state: ProxyState<R>) -> Router {
    Router::new()
        .route("/proxy", get(proxy_query::<R>).post(proxy_json::<R>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn proxy_query<R: Resolver>(
    State(state): State<ProxyState<R>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<ProxyQuery>,
) -> AppResult<Response> {
    let fetch_method = if method == Method::HEAD {
        FetchMethod::Head
    } else {
        FetchMethod::Get
    };

    let principal = state.tokens.authenticate(&headers, query.token.as_deref())?;
    let raw_url = query.url.ok_or_else(|| RelayError::InvalidUrl {
        reason: "missing url parameter".to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    relay(&state, &principal, &raw_url, fetch_method).await
}

async fn proxy_json<R: Resolver>(
    State(state): State<ProxyState<R>>,
    headers: HeaderMap,
    Query(query): Query<ProxyQuery>,
    body: Result<Json<ProxyBody>, JsonRejection>,
) -> AppResult<Response> {
    let principal = state.tokens.authenticate(&headers, query.token.as_deref())?;

    let Json(body) = body.map_err(|rejection| AppError::InvalidRequest {
        reason: rejection.body_text(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let fetch_method = match body.method.as_deref() {
        None => FetchMethod::Get,
        Some(raw) => FetchMethod::parse(raw).ok_or_else(|| RelayError::InvalidUrl {
            reason: format!("unsupported method {raw}"),
            location: ErrorLocation::from(Location::caller()),
        })?,
    };

    relay(&state, &principal, &body.url, fetch_method).await
}

/// Authenticated request path: rate limit, guard, fetch, stream back.
#[instrument(skip(state, raw_url), fields(request_id = tracing::field::Empty))]
async fn relay<R: Resolver>(
    state: &ProxyState<R>,
    principal: &str,
    raw_url: &str,
    method: FetchMethod,
) -> AppResult<Response> {
    let request_id = Uuid::new_v4();
    tracing::Span::current().record("request_id", tracing::field::display(request_id));

    state.limiter.check(principal)?;
    let target = state.guard.validate(raw_url).await?;
    let upstream = state.client.fetch(&target, method).await?;

    info!(
        host = %target.host,
        port = target.port,
        status = upstream.status,
        "Relaying upstream response"
    );

    Ok(relay_response(upstream, request_id, state.shutdown.clone()))
}

/// Turn an upstream answer into the caller's response. The body is cut off
/// once shutdown is signalled.
pub(crate) fn relay_response(
    upstream: UpstreamResponse,
    request_id: Uuid,
    shutdown: watch::Receiver<bool>,
) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = no_cache_headers();
    if let Some(value) = upstream
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(length) = upstream.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    // Dropping the body (client gone or shutdown) drops the upstream
    // connection with it.
    let body = match upstream.body {
        Some(stream) => {
            let live = shutdown.clone();
            Body::from_stream(
                stream
                    .take_while(move |_| future::ready(!*live.borrow()))
                    .take_until(shutdown_requested(shutdown)),
            )
        }
        None => Body::empty(),
    };

    (status, headers, body).into_response()
}
