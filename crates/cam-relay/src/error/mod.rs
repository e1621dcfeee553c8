use cam_relay_core::{BlockReason, ErrorCategory, RelayError, UpstreamErrorKind};

use std::{panic::Location, result::Result as StdResult, time::Duration};

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use error_location::ErrorLocation;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Application-level errors for the cam-relay binary.
///
/// All variants include `ErrorLocation` for call-site tracking.
#[derive(Error, Debug)]
pub enum AppError {
    /// Relay or recording error from cam-relay-core.
    #[error("Relay error: {source} {location}")]
    Relay {
        /// The underlying core error.
        #[source]
        source: RelayError,
        /// Location where this error was created.
        location: ErrorLocation,
    },

    /// Request body or query could not be parsed.
    #[error("Invalid request: {reason} {location}")]
    InvalidRequest {
        /// Parser message.
        reason: String,
        /// Location where this error was created.
        location: ErrorLocation,
    },

    /// Configuration loading or saving error.
    #[error("Configuration error: {reason} {location}")]
    ConfigError {
        /// Human-readable reason for failure.
        reason: String,
        /// Location where this error was created.
        location: ErrorLocation,
    },

    /// A listener could not be bound.
    #[error("Failed to bind {address}: {source} {location}")]
    ServerBind {
        /// Address that was requested.
        address: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
        /// Location where this error was created.
        location: ErrorLocation,
    },

    /// IO error from filesystem operations.
    #[error("IO error: {source} {location}")]
    IoError {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
        /// Location where this error was created.
        location: ErrorLocation,
    },
}

// Manual From<RelayError> with location tracking.
// Cannot use #[from] because it does not support extra fields.
impl From<RelayError> for AppError {
    #[track_caller]
    fn from(source: RelayError) -> Self {
        AppError::Relay {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<std::io::Error> for AppError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        AppError::IoError {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

/// Convenience type alias for Results using `AppError`.
pub type Result<T> = StdResult<T, AppError>;

/// HTTP rendering of an error: status, stable code, client-facing message.
pub(crate) struct ErrorReply {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
    pub(crate) extra: Map<String, Value>,
    pub(crate) retry_after: Option<u64>,
}

impl ErrorReply {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            extra: Map::new(),
            retry_after: None,
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero.
pub(crate) fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl From<&RelayError> for ErrorReply {
    fn from(err: &RelayError) -> Self {
        match err {
            RelayError::InvalidRecordingId { reason, .. } => {
                ErrorReply::new(StatusCode::BAD_REQUEST, "invalid_request", reason.clone())
            }
            RelayError::InvalidOutputPath { reason, .. } => {
                ErrorReply::new(StatusCode::BAD_REQUEST, "invalid_path", reason.clone())
            }
            RelayError::PathTraversal { .. } => ErrorReply::new(
                StatusCode::BAD_REQUEST,
                "invalid_path",
                "output path is not allowed",
            ),
            RelayError::InvalidUrl { .. } => {
                ErrorReply::new(StatusCode::BAD_REQUEST, "invalid_url", "target URL is not valid")
            }
            RelayError::BlockedTarget { reason, .. } => {
                let code = match reason {
                    BlockReason::PrivateAddress => "lan_unreachable",
                    _ => "blocked",
                };
                ErrorReply::new(StatusCode::BAD_REQUEST, code, reason.to_string())
                    .with("reason", json!(reason.code()))
            }
            RelayError::Unauthorized { .. } => ErrorReply::new(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "authentication required",
            ),
            RelayError::RateLimited { retry_after, .. } => {
                let secs = retry_after_secs(*retry_after);
                let mut reply = ErrorReply::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "too many requests",
                )
                .with("retry_after_seconds", json!(secs));
                reply.retry_after = Some(secs);
                reply
            }
            RelayError::DuplicateRecording { recording_id, .. } => ErrorReply::new(
                StatusCode::BAD_REQUEST,
                "duplicate_recording",
                format!("recording {} is already active", recording_id),
            ),
            RelayError::ConcurrencyLimit { max, .. } => ErrorReply::new(
                StatusCode::TOO_MANY_REQUESTS,
                "capacity",
                format!("at most {} recordings may run at once", max),
            )
            .with("max_concurrent_recordings", json!(max)),
            RelayError::RecordingNotFound { recording_id, .. } => ErrorReply::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("no active recording {}", recording_id),
            ),
            RelayError::Upstream { kind, .. } => {
                let (status, code) = match kind {
                    UpstreamErrorKind::Timeout => (StatusCode::REQUEST_TIMEOUT, "upstream_timeout"),
                    _ => (StatusCode::BAD_GATEWAY, "upstream_unreachable"),
                };
                ErrorReply::new(status, code, "camera could not be reached")
                    .with("kind", json!(kind.code()))
                    .with("hint", json!(kind.hint()))
            }
            RelayError::SpawnFailed { .. } => ErrorReply::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoder_unavailable",
                "encoder could not be started",
            ),
            RelayError::RecordingLog { .. } | RelayError::Io { .. } => ErrorReply::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal error",
            ),
        }
    }
}

impl From<&AppError> for ErrorReply {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::Relay { source, .. } => ErrorReply::from(source),
            AppError::InvalidRequest { reason, .. } => {
                ErrorReply::new(StatusCode::BAD_REQUEST, "invalid_request", reason.clone())
            }
            _ => ErrorReply::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal error",
            ),
        }
    }
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert("error".to_string(), json!(self.code));
        body.insert("message".to_string(), json!(self.message));
        body.extend(self.extra);

        let mut response = (self.status, Json(Value::Object(body))).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let reply = ErrorReply::from(&self);

        match &self {
            AppError::Relay { source, .. } if source.category() == ErrorCategory::Security => {
                warn!(code = reply.code, status = reply.status.as_u16(), "Request rejected");
            }
            _ if reply.status.is_server_error() => {
                error!(error = %self, status = reply.status.as_u16(), "Request failed");
            }
            _ => {
                debug!(error = %self, status = reply.status.as_u16(), "Request failed");
            }
        }

        reply.into_response()
    }
}
