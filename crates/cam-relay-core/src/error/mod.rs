use std::{fmt, panic::Location, time::Duration};

use error_location::ErrorLocation;
use thiserror::Error;

/// Broad failure categories. Retry and HTTP mapping decisions are made on
/// the category, never on the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed id, path, quality or URL. Rejected before any side effect.
    Validation,
    /// Policy rejection: SSRF block, traversal, bad credential.
    Security,
    /// Concurrency, duplicate or rate limit. Retryable later.
    Capacity,
    /// Camera unreachable, timed out or failed to resolve.
    Upstream,
    /// Encoder spawn failure or unexpected exit.
    Process,
    /// Unknown recording id.
    NotFound,
    /// Local filesystem failure.
    Io,
}

/// Why the URL guard refused a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Scheme other than http/https.
    UnsupportedScheme,
    /// URL has no host component.
    MissingHost,
    /// Loopback, unspecified, multicast or broadcast address.
    LoopbackAddress,
    /// Link-local address (169.254/16, fe80::/10).
    LinkLocalAddress,
    /// Private address that is not covered by the LAN allow-list.
    PrivateAddress,
    /// Port outside the allow-list.
    DisallowedPort(u16),
    /// Hostname resolved to at least one non-public address.
    ResolvedToPrivate,
}

impl BlockReason {
    /// Stable machine-readable code used in logs and response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::UnsupportedScheme => "unsupported_scheme",
            BlockReason::MissingHost => "missing_host",
            BlockReason::LoopbackAddress => "loopback_address",
            BlockReason::LinkLocalAddress => "link_local_address",
            BlockReason::PrivateAddress => "lan_unreachable",
            BlockReason::DisallowedPort(_) => "disallowed_port",
            BlockReason::ResolvedToPrivate => "resolved_to_private",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::UnsupportedScheme => write!(f, "only http and https targets are allowed"),
            BlockReason::MissingHost => write!(f, "target has no host"),
            BlockReason::LoopbackAddress => write!(f, "loopback targets are not allowed"),
            BlockReason::LinkLocalAddress => write!(f, "link-local targets are not allowed"),
            BlockReason::PrivateAddress => {
                write!(f, "LAN address is not reachable from this proxy")
            }
            BlockReason::DisallowedPort(port) => write!(f, "port {port} is not allowed"),
            BlockReason::ResolvedToPrivate => {
                write!(f, "hostname resolves to a non-public address")
            }
        }
    }
}

/// Sub-classification of upstream failures so callers can tell a powered-off
/// camera from a missing port forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// No response within the deadline.
    Timeout,
    /// Connection actively refused.
    Refused,
    /// Hostname did not resolve.
    Dns,
    /// Other connect-phase failure (unreachable network, etc).
    Connect,
    /// TLS handshake failure.
    Tls,
    /// Connection dropped mid-request.
    Reset,
    /// Upstream answered, but with an error status.
    Status(u16),
}

impl UpstreamErrorKind {
    /// Whether the failure happened at the connection level. Only these are
    /// retried by the proxy; an upstream HTTP status never is.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            UpstreamErrorKind::Timeout
                | UpstreamErrorKind::Refused
                | UpstreamErrorKind::Connect
                | UpstreamErrorKind::Reset
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::Refused => "refused",
            UpstreamErrorKind::Dns => "dns",
            UpstreamErrorKind::Connect => "connect",
            UpstreamErrorKind::Tls => "tls",
            UpstreamErrorKind::Reset => "reset",
            UpstreamErrorKind::Status(_) => "status",
        }
    }

    /// Operator-facing hint for the dashboard.
    pub fn hint(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Timeout => "camera did not answer in time; check it is powered on",
            UpstreamErrorKind::Refused => "connection refused; check port forwarding on the router",
            UpstreamErrorKind::Dns => "hostname did not resolve; check the dynamic DNS name",
            UpstreamErrorKind::Connect => "network unreachable; check the camera's network",
            UpstreamErrorKind::Tls => "TLS handshake failed; check the camera's certificate",
            UpstreamErrorKind::Reset => "connection dropped by the camera",
            UpstreamErrorKind::Status(_) => "camera returned an error status",
        }
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamErrorKind::Status(code) => write!(f, "status {code}"),
            other => write!(f, "{}", other.code()),
        }
    }
}

/// Errors produced by the relay and recording core, with source location
/// tracking.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Recording id is empty, too long, or uses characters outside the
    /// accepted alphabet.
    #[error("Invalid recording id: {reason} {location}")]
    InvalidRecordingId {
        /// What was wrong with the id.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Output path is malformed or cannot be prepared.
    #[error("Invalid output path: {reason} {location}")]
    InvalidOutputPath {
        /// What was wrong with the path.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Output path tries to leave the recordings root.
    #[error("Path traversal rejected {location}")]
    PathTraversal {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Target URL could not be parsed.
    #[error("Invalid url: {reason} {location}")]
    InvalidUrl {
        /// Parser message.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Target refused by the SSRF guard.
    #[error("Target blocked: {reason} {location}")]
    BlockedTarget {
        /// Which rule rejected the target.
        reason: BlockReason,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Missing or unknown bearer credential.
    #[error("Authentication required {location}")]
    Unauthorized {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Principal exceeded its request window.
    #[error("Rate limited, retry after {retry_after:?} {location}")]
    RateLimited {
        /// Time until the window resets.
        retry_after: Duration,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Recording id already has an active reservation.
    #[error("Recording already active: {recording_id} {location}")]
    DuplicateRecording {
        /// The duplicated id.
        recording_id: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Active recording count reached the configured cap.
    #[error("Concurrent recording limit of {max} reached {location}")]
    ConcurrencyLimit {
        /// The configured cap.
        max: usize,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// No active reservation for the id.
    #[error("Recording not found: {recording_id} {location}")]
    RecordingNotFound {
        /// The unknown id.
        recording_id: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Upstream camera failure.
    #[error("Upstream {kind}: {detail} {location}")]
    Upstream {
        /// Failure subtype.
        kind: UpstreamErrorKind,
        /// Low-level description, logged but not returned to callers.
        detail: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Encoder subprocess could not be spawned.
    #[error("Encoder spawn failed: {source} {location}")]
    SpawnFailed {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Recording log could not be read or written.
    #[error("Recording log error: {reason} {location}")]
    RecordingLog {
        /// Description of the failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// IO error from filesystem operations.
    #[error("IO error: {source} {location}")]
    Io {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
        /// Source location where error occurred.
        location: ErrorLocation,
    },
}

impl RelayError {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRecordingId { .. }
            | RelayError::InvalidOutputPath { .. }
            | RelayError::InvalidUrl { .. } => ErrorCategory::Validation,
            RelayError::PathTraversal { .. }
            | RelayError::BlockedTarget { .. }
            | RelayError::Unauthorized { .. } => ErrorCategory::Security,
            RelayError::RateLimited { .. }
            | RelayError::DuplicateRecording { .. }
            | RelayError::ConcurrencyLimit { .. } => ErrorCategory::Capacity,
            RelayError::RecordingNotFound { .. } => ErrorCategory::NotFound,
            RelayError::Upstream { .. } => ErrorCategory::Upstream,
            RelayError::SpawnFailed { .. } => ErrorCategory::Process,
            RelayError::RecordingLog { .. } | RelayError::Io { .. } => ErrorCategory::Io,
        }
    }

    /// Whether an internal retry may succeed. Only connection-level upstream
    /// failures qualify; capacity errors are retryable by the caller after
    /// the indicated interval, not internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Upstream { kind, .. } => kind.is_connection_level(),
            _ => false,
        }
    }

    /// Build an upstream error at the caller's location.
    #[track_caller]
    pub fn upstream(kind: UpstreamErrorKind, detail: impl Into<String>) -> Self {
        RelayError::Upstream {
            kind,
            detail: detail.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Build a guard rejection at the caller's location.
    #[track_caller]
    pub fn blocked(reason: BlockReason) -> Self {
        RelayError::BlockedTarget {
            reason,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<std::io::Error> for RelayError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        RelayError::Io {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

/// Result type alias using [`RelayError`].
pub type Result<T> = std::result::Result<T, RelayError>;
