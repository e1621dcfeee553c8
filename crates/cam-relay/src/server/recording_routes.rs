//! Recording control API and health endpoint.

use crate::{
    AppError, AppResult,
    server::{CameraFeed, StreamState, root_redirect, stream_mjpg},
};

use cam_relay_core::{EncoderLauncher, RecordingOrchestrator, RecordingSnapshot, RecordingStopped, StartRequest};

use std::{panic::Location, sync::Arc};

use axum::{
    Json, Router,
    extract::{FromRef, Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use error_location::ErrorLocation;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

/// Shared state for the recorder router.
pub struct RecorderState<L: EncoderLauncher> {
    pub(crate) orchestrator: Arc<RecordingOrchestrator<L>>,
    pub(crate) feed: Option<CameraFeed>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

// Derived Clone would require `L: Clone`.
impl<L: EncoderLauncher> Clone for RecorderState<L> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            feed: self.feed.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<L: EncoderLauncher> RecorderState<L> {
    /// Bundle the recorder's collaborators.
    pub fn new(
        orchestrator: Arc<RecordingOrchestrator<L>>,
        feed: Option<CameraFeed>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            feed,
            shutdown,
        }
    }
}

impl<L: EncoderLauncher> FromRef<RecorderState<L>> for StreamState {
    fn from_ref(state: &RecorderState<L>) -> Self {
        StreamState {
            feed: state.feed.clone(),
            shutdown: state.shutdown.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StopRequest {
    recording_id: String,
}

/// Routes for the recording API plus the local restream.
pub fn recorder_router<L: EncoderLauncher>(state: RecorderState<L>) -> Router {
    Router::new()
        .route("/", get(root_redirect))
        .route("/stream.mjpg", get(stream_mjpg))
        .route("/health", get(health::<L>))
        .route("/recording/start", post(start_recording::<L>))
        .route("/recording/stop", post(stop_recording::<L>))
        .route("/recording/status/{id}", get(recording_status::<L>))
        .route("/recording/active", get(active_recordings::<L>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health<L: EncoderLauncher>(State(state): State<RecorderState<L>>) -> Json<Value> {
    let camera_feed = match &state.feed {
        Some(feed) => json!(feed.state()),
        None => json!("disabled"),
    };

    Json(json!({
        "status": "ok",
        "active_recordings": state.orchestrator.active_count().await,
        "max_concurrent_recordings": state.orchestrator.max_concurrent(),
        "camera_feed": camera_feed,
    }))
}

async fn start_recording<L: EncoderLauncher>(
    State(state): State<RecorderState<L>>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(request) = body.map_err(invalid_body)?;
    let started = state.orchestrator.start(request).await?;

    Ok(Json(json!({
        "status": "recording",
        "recording_id": started.recording_id,
        "filename": started.filename,
        "quality": started.quality,
        "started_at": started.started_at,
    })))
}

async fn stop_recording<L: EncoderLauncher>(
    State(state): State<RecorderState<L>>,
    body: Result<Json<StopRequest>, JsonRejection>,
) -> AppResult<Json<RecordingStopped>> {
    let Json(request) = body.map_err(invalid_body)?;
    let stopped = state.orchestrator.stop(&request.recording_id).await?;
    Ok(Json(stopped))
}

async fn recording_status<L: EncoderLauncher>(
    State(state): State<RecorderState<L>>,
    Path(id): Path<String>,
) -> Json<RecordingSnapshot> {
    Json(state.orchestrator.status(&id).await)
}

async fn active_recordings<L: EncoderLauncher>(
    State(state): State<RecorderState<L>>,
) -> Json<Vec<RecordingSnapshot>> {
    Json(state.orchestrator.list().await)
}

#[track_caller]
fn invalid_body(rejection: JsonRejection) -> AppError {
    AppError::InvalidRequest {
        reason: rejection.body_text(),
        location: ErrorLocation::from(Location::caller()),
    }
}
