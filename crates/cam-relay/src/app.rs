use crate::{
    AppError, AppResult,
    config::Config,
    server::{CameraFeed, ProxyState, RecorderState, TokenTable, proxy_router, recorder_router},
};

use cam_relay_core::{HttpFrameSource, RateLimiter, RecordingOrchestrator, UpstreamClient, UrlGuard};

use std::{panic::Location, sync::Arc, time::Duration};

use axum::Router;
use error_location::ErrorLocation;
use tokio::{
    net::TcpListener,
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tracing::{debug, error, info, instrument, warn};

/// How long the HTTP servers get to drain after shutdown is signalled.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application state.
///
/// Owns the shutdown channel every long-running task listens on.
pub struct App {
    pub(crate) config: Config,
    pub(crate) shutdown_tx: watch::Sender<bool>,
}

impl App {
    /// Application over a loaded configuration.
    pub(crate) fn new(config: Config) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Serve both routers until Ctrl-C or SIGTERM, then stop every
    /// recording, the camera feed and the servers, in that order.
    #[instrument(skip(self))]
    pub(crate) async fn run(self) -> AppResult<()> {
        info!("cam-relay starting");

        let shutdown_rx = self.shutdown_tx.subscribe();

        let limiter = Arc::new(RateLimiter::new(self.config.proxy.rate_limit()));
        if self.config.proxy.tokens.is_empty() {
            warn!("No proxy tokens configured; every proxy request will be rejected");
        }
        let proxy_state = ProxyState::new(
            TokenTable::new(&self.config.proxy.tokens),
            Arc::clone(&limiter),
            UrlGuard::new(self.config.proxy.guard_policy()),
            UpstreamClient::new(self.config.proxy.fetch_config()),
            shutdown_rx.clone(),
        );

        let orchestrator = Arc::new(RecordingOrchestrator::new(
            self.config.recorder.orchestrator_config(),
            self.config.recorder.launcher(),
        )?);

        let (feed, feed_pump) = match self.start_camera_feed()? {
            Some((feed, pump)) => (Some(feed), Some(pump)),
            None => (None, None),
        };

        let recorder_state =
            RecorderState::new(Arc::clone(&orchestrator), feed.clone(), shutdown_rx.clone());

        let sweeper = tokio::spawn(sweep_rate_limits(
            limiter,
            self.config.proxy.sweep_interval(),
            shutdown_rx.clone(),
        ));

        let listen = &self.config.server;
        let proxy_listener = bind(&listen.bind_address, listen.proxy_port).await?;
        let recorder_listener = bind(&listen.bind_address, listen.recorder_port).await?;

        let mut proxy_server = tokio::spawn(serve(
            "proxy",
            proxy_listener,
            proxy_router(proxy_state),
            shutdown_rx.clone(),
        ));
        let mut recorder_server = tokio::spawn(serve(
            "recorder",
            recorder_listener,
            recorder_router(recorder_state),
            shutdown_rx,
        ));

        let exited = tokio::select! {
            result = wait_for_shutdown_signal() => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!(error = ?e, "Signal handler failed, shutting down"),
                }
                None
            }
            result = &mut proxy_server => {
                error!(result = ?result, "Proxy server exited unexpectedly");
                Some("proxy")
            }
            result = &mut recorder_server => {
                error!(result = ?result, "Recorder server exited unexpectedly");
                Some("recorder")
            }
        };

        // Encoders read the local restream, so they are stopped while it is
        // still being served.
        let stopped = orchestrator.shutdown_all().await;
        info!(count = stopped.len(), "Recordings stopped");

        let _ = self.shutdown_tx.send(true);

        if let Some(feed) = &feed {
            feed.disconnect();
        }

        // A handle that already completed in the select must not be polled again.
        for (name, handle) in [("proxy", proxy_server), ("recorder", recorder_server)] {
            if exited != Some(name) {
                join_with_timeout(name, handle).await;
            }
        }
        if let Some(pump) = feed_pump {
            join_with_timeout("camera feed", pump).await;
        }
        join_with_timeout("rate limit sweeper", sweeper).await;

        info!("cam-relay shut down successfully");

        Ok(())
    }

    fn start_camera_feed(&self) -> AppResult<Option<(CameraFeed, JoinHandle<()>)>> {
        let Some(url) = self.config.camera.source_url.as_deref() else {
            info!("No camera source configured, restream disabled");
            return Ok(None);
        };

        let source = HttpFrameSource::new(url, self.config.camera.connect_timeout())?;
        info!(source = %source.url(), "Starting camera feed");

        Ok(Some(CameraFeed::spawn(
            source,
            self.config.camera.supervisor_config(),
        )))
    }
}

#[track_caller]
fn bind_error(address: String, source: std::io::Error) -> AppError {
    AppError::ServerBind {
        address,
        source,
        location: ErrorLocation::from(Location::caller()),
    }
}

async fn bind(host: &str, port: u16) -> AppResult<TcpListener> {
    let address = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| bind_error(address.clone(), e))?;
    info!(address = %address, "Listening");
    Ok(listener)
}

async fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> AppResult<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        })
        .await?;
    debug!(server = name, "Server stopped");
    Ok(())
}

async fn sweep_rate_limits(
    limiter: Arc<RateLimiter>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, "Swept idle rate limit buckets");
                }
            }
            _ = shutdown.wait_for(|stopping| *stopping) => break,
        }
    }
}

async fn join_with_timeout<T: std::fmt::Debug>(name: &str, handle: JoinHandle<T>) {
    match timeout(SERVER_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(result)) => debug!(task = name, result = ?result, "Task stopped"),
        Ok(Err(e)) => error!(task = name, error = ?e, "Task panicked"),
        Err(_) => warn!(task = name, "Task did not stop within timeout, abandoning"),
    }
}

async fn wait_for_shutdown_signal() -> AppResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
