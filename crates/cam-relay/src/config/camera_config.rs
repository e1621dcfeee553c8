use cam_relay_core::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_FAILURES, SupervisorConfig,
};

use std::time::Duration;

use crate::config::millis;
use serde::{Deserialize, Serialize};

/// Camera feed behind `/stream.mjpg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// MJPEG source URL. The restream is disabled when unset.
    pub source_url: Option<String>,
    /// Consecutive failures before the feed gives up.
    pub max_failures: u32,
    /// First reconnect delay.
    pub backoff_base_ms: u64,
    /// Reconnect delay ceiling.
    pub backoff_cap_ms: u64,
    /// Longest silence tolerated on an open connection.
    pub read_timeout_ms: u64,
    /// Connect deadline for each attempt.
    pub connect_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            max_failures: DEFAULT_MAX_FAILURES,
            backoff_base_ms: millis(DEFAULT_BACKOFF_BASE),
            backoff_cap_ms: millis(DEFAULT_BACKOFF_CAP),
            read_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl CameraConfig {
    /// Supervisor settings derived from this section.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_failures: self.max_failures,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            ..SupervisorConfig::default()
        }
    }

    /// Connect deadline for each attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
