//! cam-relay: camera stream relay and recording control service.

mod app;
mod config;
mod error;
mod server;

pub(crate) use {
    app::App,
    error::{AppError, Result as AppResult},
};

use crate::config::Config;

use tracing::error;
use tracing_subscriber::EnvFilter;

/// Application entry point.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cam_relay=debug,cam_relay_core=debug")),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:?}", e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {:?}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(App::new(config).run()) {
        error!(error = ?e, "App error");
        std::process::exit(1);
    }
}
