//! Configuration management for cam-relay.
//!
//! Handles loading and saving the TOML configuration file, validation at
//! load time, and atomic writes.

use crate::{
    AppError, AppResult,
    config::{CONFIG_ENV_VAR, CameraConfig, ProxyConfig, RecorderConfig, ServerConfig, project_dirs},
};

use std::{
    env, fs,
    io::Write,
    panic::Location,
    path::{Path, PathBuf},
};

use error_location::ErrorLocation;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener addresses.
    #[serde(default)]
    pub server: ServerConfig,
    /// Streaming proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Recording orchestrator settings.
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// Camera feed for the local restream.
    #[serde(default)]
    pub camera: CameraConfig,
}

impl Config {
    /// Load configuration from `$CAM_RELAY_CONFIG` or the platform config
    /// directory, creating a default file if none exists.
    #[track_caller]
    #[instrument]
    pub fn load() -> AppResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            info!(config_path = ?config_path, "No config found, creating default");
            Self::create_default(&config_path)
        }
    }

    /// Read, parse and validate the file at `path`.
    #[track_caller]
    #[instrument]
    pub fn load_from(path: &Path) -> AppResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to read config: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        config.validate()?;

        info!(config_path = ?path, "Configuration loaded");

        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    #[track_caller]
    pub fn validate(&self) -> AppResult<()> {
        let fail = |reason: String| AppError::ConfigError {
            reason,
            location: ErrorLocation::from(Location::caller()),
        };

        if let Some((name, _)) = self.proxy.tokens.iter().find(|(_, t)| t.trim().is_empty()) {
            return Err(fail(format!("Token '{}' is empty", name)));
        }
        if self.proxy.rate_limit_max_requests == 0 || self.proxy.rate_limit_window_secs == 0 {
            return Err(fail("Rate limit must allow at least one request per non-zero window".to_string()));
        }
        if self.proxy.max_attempts == 0 {
            return Err(fail("proxy.max_attempts must be at least 1".to_string()));
        }
        if self.recorder.max_concurrent == 0 {
            return Err(fail("recorder.max_concurrent must be at least 1".to_string()));
        }
        if self.recorder.max_duration_secs == 0 {
            return Err(fail("recorder.max_duration_secs must be non-zero".to_string()));
        }
        if self.camera.max_failures == 0 {
            return Err(fail("camera.max_failures must be at least 1".to_string()));
        }
        if self.server.proxy_port == 0 || self.server.recorder_port == 0 {
            return Err(fail("Listener ports must be non-zero".to_string()));
        }
        if self.server.proxy_port == self.server.recorder_port {
            return Err(fail(format!(
                "Proxy and recorder cannot share port {}",
                self.server.proxy_port
            )));
        }

        Ok(())
    }

    /// Save configuration to `path` using an atomic write.
    ///
    /// Writes to a temporary file first, then renames to prevent corruption
    /// if the process crashes during the write.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        // Atomic write: write to temp file then rename
        let temp_path = path.with_extension("toml.tmp");

        let mut temp_file = fs::File::create(&temp_path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to create temp config file: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        temp_file
            .write_all(contents.as_bytes())
            .map_err(|e| AppError::ConfigError {
                reason: format!("Failed to write temp config file: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;

        temp_file.sync_all().map_err(|e| AppError::ConfigError {
            reason: format!("Failed to sync temp config file: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        fs::rename(&temp_path, path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to rename temp config to final: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        info!(config_path = ?path, "Configuration saved (atomic write)");

        Ok(())
    }

    /// Defaults plus one freshly generated dashboard token.
    pub fn with_generated_token() -> Self {
        let mut config = Self::default();
        config
            .proxy
            .tokens
            .insert("dashboard".to_string(), Uuid::new_v4().simple().to_string());
        config
    }

    #[track_caller]
    fn config_path() -> AppResult<PathBuf> {
        if let Ok(explicit) = env::var(CONFIG_ENV_VAR) {
            debug!(config_path = %explicit, "Using config path from environment");
            return Ok(PathBuf::from(explicit));
        }

        let proj_dirs = project_dirs().ok_or_else(|| AppError::ConfigError {
            reason: "Failed to get config directory".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    #[track_caller]
    fn create_default(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| AppError::ConfigError {
                reason: format!("Failed to create config directory: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;
        }

        let config = Self::with_generated_token();
        config.save_to(path)?;

        warn!(
            config_path = ?path,
            "Generated a proxy token named 'dashboard'; copy it from the config file"
        );

        Ok(config)
    }
}
