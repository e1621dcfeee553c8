mod camera_config;
#[allow(clippy::module_inception)]
mod config;
mod proxy_config;
mod recorder_config;
mod server_config;

pub(crate) use {
    camera_config::CameraConfig, config::Config, proxy_config::ProxyConfig,
    recorder_config::RecorderConfig, server_config::ServerConfig,
};

use std::{path::PathBuf, time::Duration};

use directories::ProjectDirs;

pub(crate) const CONFIG_ENV_VAR: &str = "CAM_RELAY_CONFIG";

pub(crate) const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub(crate) const DEFAULT_PROXY_PORT: u16 = 8080;
pub(crate) const DEFAULT_RECORDER_PORT: u16 = 8000;

pub(crate) const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub(crate) const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "cam-relay", "Cam-Relay")
}

pub(crate) fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

pub(crate) fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

pub(crate) fn default_recorder_port() -> u16 {
    DEFAULT_RECORDER_PORT
}

pub(crate) fn default_recordings_root() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("recordings"))
        .unwrap_or_else(|| PathBuf::from("recordings"))
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
