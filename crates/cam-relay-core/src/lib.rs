//! cam-relay core library
//!
//! Camera stream relay and recording control: an SSRF-hardened upstream
//! fetcher with per-principal rate limiting, an MJPEG frame demultiplexer
//! driven by a reconnection supervisor, and a recording orchestrator that
//! runs a bounded pool of encoder subprocesses with graceful-then-forced
//! shutdown.
//!
//! # Example
//!
//! ```no_run
//! use cam_relay_core::{
//!     CoreResult, FfmpegLauncher, OrchestratorConfig, RecordingOrchestrator, StartRequest,
//! };
//!
//! async fn record() -> CoreResult<()> {
//!     let config = OrchestratorConfig::new("/var/lib/cam-relay/recordings");
//!     let orchestrator = RecordingOrchestrator::new(config, FfmpegLauncher::default())?;
//!
//!     let started = orchestrator
//!         .start(StartRequest {
//!             recording_id: "porch-1".to_string(),
//!             ..StartRequest::default()
//!         })
//!         .await?;
//!     println!("Recording to {}", started.filename);
//!
//!     let stopped = orchestrator.stop("porch-1").await?;
//!     println!("Wrote {} bytes", stopped.file_size);
//!     Ok(())
//! }
//! ```

mod error;
mod recording;
mod security;
mod stream;

pub use {
    error::{BlockReason, ErrorCategory, RelayError, Result as CoreResult, UpstreamErrorKind},
    recording::*,
    security::*,
    stream::*,
};

#[cfg(test)]
mod tests;
