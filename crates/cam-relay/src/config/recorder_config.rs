use cam_relay_core::{
    DEFAULT_GRACE_PERIOD, DEFAULT_KILL_WAIT, DEFAULT_LOCAL_STREAM_URL, DEFAULT_MAX_CONCURRENT,
    DEFAULT_MAX_DURATION, DEFAULT_SETTLE_DELAY, FfmpegLauncher, OrchestratorConfig,
};

use std::{path::PathBuf, time::Duration};

use crate::config::{DEFAULT_ENCODER_PROGRAM, default_recordings_root, millis};
use serde::{Deserialize, Serialize};

/// Recording orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Only directory recordings may be written under.
    pub recordings_root: PathBuf,
    /// Active encoder cap.
    pub max_concurrent: usize,
    /// Encoder executable, looked up on `PATH` when not absolute.
    pub encoder_program: PathBuf,
    /// Stream every encoder reads.
    pub local_stream_url: String,
    /// Encoder run-time limit.
    pub max_duration_secs: u64,
    /// Wait after SIGINT before SIGKILL.
    pub grace_period_ms: u64,
    /// Wait for reaping after SIGKILL.
    pub kill_wait_ms: u64,
    /// Pause between encoder exit and file stat.
    pub settle_delay_ms: u64,
    /// Recording log location. Defaults to `recordings.json` in the root.
    pub recording_log: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recordings_root: default_recordings_root(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            encoder_program: PathBuf::from(DEFAULT_ENCODER_PROGRAM),
            local_stream_url: DEFAULT_LOCAL_STREAM_URL.to_string(),
            max_duration_secs: DEFAULT_MAX_DURATION.as_secs(),
            grace_period_ms: millis(DEFAULT_GRACE_PERIOD),
            kill_wait_ms: millis(DEFAULT_KILL_WAIT),
            settle_delay_ms: millis(DEFAULT_SETTLE_DELAY),
            recording_log: None,
        }
    }
}

impl RecorderConfig {
    /// Orchestrator settings derived from this section.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent: self.max_concurrent,
            local_stream_url: self.local_stream_url.clone(),
            max_duration: Duration::from_secs(self.max_duration_secs),
            grace_period: Duration::from_millis(self.grace_period_ms),
            kill_wait: Duration::from_millis(self.kill_wait_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            log_path: self.recording_log.clone(),
            ..OrchestratorConfig::new(self.recordings_root.clone())
        }
    }

    /// Launcher for the configured encoder program.
    pub fn launcher(&self) -> FfmpegLauncher {
        FfmpegLauncher::new(self.encoder_program.clone())
    }
}
