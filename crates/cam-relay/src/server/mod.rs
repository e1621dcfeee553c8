mod auth;
mod camera_feed;
pub(crate) mod proxy_routes;
mod recording_routes;
mod stream_routes;

pub(crate) use {
    auth::TokenTable,
    camera_feed::CameraFeed,
    proxy_routes::{ProxyState, proxy_router},
    recording_routes::{RecorderState, recorder_router},
    stream_routes::{StreamState, root_redirect, stream_mjpg},
};

use axum::http::{HeaderMap, HeaderValue, header};
use tokio::sync::watch;

/// Headers that stop browsers and proxies from caching live responses.
pub(crate) fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers
}

/// Resolves once shutdown has been signalled or the sender is gone.
pub(crate) async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}
