use crate::server::{CameraFeed, no_cache_headers, shutdown_requested};

use cam_relay_core::{encode_part, mjpeg_content_type};

use std::convert::Infallible;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, stream};
use serde_json::json;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info};

/// State for the restream endpoints, extracted from the recorder state.
#[derive(Clone)]
pub struct StreamState {
    pub(crate) feed: Option<CameraFeed>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// `GET /`: send browsers to the stream.
pub(crate) async fn root_redirect() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/stream.mjpg")],
    )
}

/// `GET /stream.mjpg`: multipart restream of the camera feed.
pub(crate) async fn stream_mjpg(State(state): State<StreamState>) -> Response {
    let Some(feed) = state.feed else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "camera_unavailable",
                "message": "no camera source is configured",
            })),
        )
            .into_response();
    };

    let receiver = feed.subscribe();
    info!(viewers = feed.viewers(), state = ?feed.state(), "Viewer connected to restream");

    let parts = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(frame) => return Some((Ok::<_, Infallible>(encode_part(&frame)), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Viewer lagging, skipped frames");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let mut headers = no_cache_headers();
    if let Ok(value) = HeaderValue::from_str(&mjpeg_content_type()) {
        headers.insert(header::CONTENT_TYPE, value);
    }

    let body = Body::from_stream(parts.take_until(shutdown_requested(state.shutdown)));
    (StatusCode::OK, headers, body).into_response()
}
