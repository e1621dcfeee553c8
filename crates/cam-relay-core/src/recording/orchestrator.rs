//! Recording orchestrator: a bounded pool of encoder subprocesses.
//!
//! Every encoder is owned by exactly one monitor task. The orchestrator only
//! talks to it through a oneshot stop request; the reservation map is
//! behind one async mutex and escalation always happens outside of it.

use crate::{
    CoreResult, RelayError,
    recording::{
        escalator::{ShutdownEscalator, ShutdownOutcome},
        quality::{QualityPreset, resolve_quality},
        recording_log::{RECORDING_LOG_FILE, RecordingLog, RecordingLogEntry},
    },
    security::{resolve_output_dir, validate_recording_id},
};

use std::{
    collections::{HashMap, VecDeque},
    fs,
    panic::Location,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use error_location::ErrorLocation;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{
    process::{Child, Command},
    sync::{Mutex, oneshot},
    time::{sleep, timeout},
};
use tracing::{debug, error, info, instrument, warn};

/// Default cap on simultaneously running encoders.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default fixed stream the encoder reads from.
pub const DEFAULT_LOCAL_STREAM_URL: &str = "http://127.0.0.1:8000/stream.mjpg";

/// Default encoder run-time limit.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60 * 60);

/// Default pause between encoder exit and file stat.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Slack on top of the escalation bound when waiting for the monitor task.
const STOP_REPLY_MARGIN: Duration = Duration::from_secs(1);

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Only directory recordings may be written under.
    pub recordings_root: PathBuf,
    /// Active encoder cap.
    pub max_concurrent: usize,
    /// Stream every encoder reads; client-supplied URLs are never used.
    pub local_stream_url: String,
    /// Encoder run-time limit, also enforced by a watchdog.
    pub max_duration: Duration,
    /// Wait after SIGINT before SIGKILL.
    pub grace_period: Duration,
    /// Wait for reaping after SIGKILL.
    pub kill_wait: Duration,
    /// Pause between encoder exit and file stat.
    pub settle_delay: Duration,
    /// Output file extension.
    pub container_extension: String,
    /// Finished recordings remembered for `status`.
    pub recent_outcomes: usize,
    /// Recording log location; defaults to `recordings.json` in the root.
    pub log_path: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Defaults rooted at `recordings_root`.
    pub fn new(recordings_root: impl Into<PathBuf>) -> Self {
        Self {
            recordings_root: recordings_root.into(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            local_stream_url: DEFAULT_LOCAL_STREAM_URL.to_string(),
            max_duration: DEFAULT_MAX_DURATION,
            grace_period: crate::recording::DEFAULT_GRACE_PERIOD,
            kill_wait: crate::recording::DEFAULT_KILL_WAIT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            container_extension: "mp4".to_string(),
            recent_outcomes: 50,
            log_path: None,
        }
    }
}

/// Everything an encoder needs to run one recording.
#[derive(Debug, Clone)]
pub struct EncoderJob {
    /// Stream to read.
    pub input_url: String,
    /// File to write.
    pub output_path: PathBuf,
    /// Output settings.
    pub quality: QualityPreset,
    /// Run-time limit.
    pub max_duration: Duration,
}

/// Builds the encoder command for a job.
pub trait EncoderLauncher: Send + Sync + 'static {
    /// Command that records `job`. The orchestrator spawns it.
    fn command(&self, job: &EncoderJob) -> Command;
}

/// ffmpeg-based encoder producing H.264 MP4.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: PathBuf,
}

impl FfmpegLauncher {
    /// Launcher running `program` (e.g. `ffmpeg` or an absolute path).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for `job`, without the program.
    pub fn args(job: &EncoderJob) -> Vec<String> {
        let quality = &job.quality;
        let bitrate = quality.bitrate_arg();
        let bufsize = format!("{}k", quality.bitrate_kbps * 2);

        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-y",
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "2",
            "-f",
            "mjpeg",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(job.input_url.clone());
        args.extend([
            "-t".to_string(),
            job.max_duration.as_secs().max(1).to_string(),
            "-vf".to_string(),
            format!("{},fps={}", quality.scale_filter(), quality.frame_rate),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-b:v".to_string(),
            bitrate.clone(),
            "-maxrate".to_string(),
            bitrate,
            "-bufsize".to_string(),
            bufsize,
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]);
        args.push(job.output_path.to_string_lossy().into_owned());
        args
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn command(&self, job: &EncoderJob) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(Self::args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

/// Reservation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    /// Slot reserved, encoder being spawned.
    Starting,
    /// Encoder running.
    Recording,
    /// Stop in progress.
    Stopping,
    /// Finished with a usable file.
    Completed,
    /// Encoder failed or produced nothing.
    Failed,
}

/// What started a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingTrigger {
    /// Motion detector.
    Motion,
    /// Operator.
    Manual,
}

impl RecordingTrigger {
    /// Filename prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingTrigger::Motion => "motion",
            RecordingTrigger::Manual => "manual",
        }
    }
}

/// Parameters for [`RecordingOrchestrator::start`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    /// Caller-chosen id.
    pub recording_id: String,
    /// Accepted and ignored; the encoder always reads the local stream.
    #[serde(default)]
    pub stream_url: Option<String>,
    /// Preset name.
    #[serde(default)]
    pub quality: Option<String>,
    /// Motion-triggered rather than manual.
    #[serde(default)]
    pub motion_triggered: bool,
    /// Output directory relative to (or inside) the recordings root.
    #[serde(default)]
    pub video_path: Option<String>,
}

/// Result of a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStarted {
    /// Recording id.
    pub recording_id: String,
    /// Output file name.
    pub filename: String,
    /// Full output path.
    pub output_path: PathBuf,
    /// Preset name.
    pub quality: &'static str,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
}

/// Result of a stop.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStopped {
    /// Recording id.
    pub recording_id: String,
    /// Output file name.
    pub filename: String,
    /// Output size in bytes; 0 if the file could not be stat'ed.
    pub file_size: u64,
    /// Wall-clock run time.
    pub duration_seconds: f64,
    /// How the encoder ended.
    pub shutdown: &'static str,
}

/// Point-in-time view of one recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSnapshot {
    /// Recording id.
    pub recording_id: String,
    /// Whether an encoder is (or is about to be) running.
    pub is_recording: bool,
    /// Lifecycle state, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordingStatus>,
    /// Run time so far, or total for a finished recording.
    pub duration_seconds: Option<f64>,
    /// Preset name.
    pub quality: Option<String>,
    /// Spawn time.
    pub started_at: Option<DateTime<Utc>>,
    /// Output file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Encoder exit code of a finished recording.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl RecordingSnapshot {
    fn unknown(recording_id: &str) -> Self {
        Self {
            recording_id: recording_id.to_string(),
            is_recording: false,
            status: None,
            duration_seconds: None,
            quality: None,
            started_at: None,
            filename: None,
            exit_code: None,
        }
    }
}

/// `{motion|manual}_{id}_{YYYY-MM-DDTHH-MM-SSZ}.{ext}`.
pub fn recording_filename(
    trigger: RecordingTrigger,
    recording_id: &str,
    at: DateTime<Utc>,
    extension: &str,
) -> String {
    format!(
        "{}_{}_{}.{}",
        trigger.as_str(),
        recording_id,
        at.format("%Y-%m-%dT%H-%M-%SZ"),
        extension
    )
}

type StopReply = oneshot::Sender<CoreResult<ShutdownOutcome>>;

struct Reservation {
    output_path: PathBuf,
    filename: String,
    quality: QualityPreset,
    trigger: RecordingTrigger,
    started_at: DateTime<Utc>,
    started: Instant,
    status: RecordingStatus,
    stop_tx: Option<oneshot::Sender<StopReply>>,
}

impl Reservation {
    fn snapshot(&self, recording_id: &str) -> RecordingSnapshot {
        RecordingSnapshot {
            recording_id: recording_id.to_string(),
            is_recording: true,
            status: Some(self.status),
            duration_seconds: Some(self.started.elapsed().as_secs_f64()),
            quality: Some(self.quality.name.to_string()),
            started_at: Some(self.started_at),
            filename: Some(self.filename.clone()),
            exit_code: None,
        }
    }
}

/// Handed from `begin_stop` to the task that completes the stop.
struct StopTicket {
    stop_tx: Option<oneshot::Sender<StopReply>>,
    output_path: PathBuf,
    filename: String,
    quality: QualityPreset,
    trigger: RecordingTrigger,
    started: Instant,
}

/// Active reservations plus a short history of finished ones.
struct ReservationStore {
    active: HashMap<String, Reservation>,
    recent: VecDeque<RecordingSnapshot>,
    recent_cap: usize,
}

impl ReservationStore {
    fn new(recent_cap: usize) -> Self {
        Self {
            active: HashMap::new(),
            recent: VecDeque::new(),
            recent_cap,
        }
    }

    fn active_count(&self) -> usize {
        self.active.len()
    }

    #[track_caller]
    fn admit(&self, recording_id: &str, max: usize) -> CoreResult<()> {
        if self.active.contains_key(recording_id) {
            return Err(RelayError::DuplicateRecording {
                recording_id: recording_id.to_string(),
                location: ErrorLocation::from(Location::caller()),
            });
        }
        if self.active.len() >= max {
            return Err(RelayError::ConcurrencyLimit {
                max,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        Ok(())
    }

    /// Mark `stopping` and hand out the stop channel. Unknown and
    /// already-stopping ids are both not found.
    #[track_caller]
    fn begin_stop(&mut self, recording_id: &str) -> CoreResult<StopTicket> {
        let not_found = || RelayError::RecordingNotFound {
            recording_id: recording_id.to_string(),
            location: ErrorLocation::from(Location::caller()),
        };

        let reservation = self.active.get_mut(recording_id).ok_or_else(not_found)?;
        if reservation.status == RecordingStatus::Stopping {
            return Err(not_found());
        }

        reservation.status = RecordingStatus::Stopping;
        Ok(StopTicket {
            stop_tx: reservation.stop_tx.take(),
            output_path: reservation.output_path.clone(),
            filename: reservation.filename.clone(),
            quality: reservation.quality,
            trigger: reservation.trigger,
            started: reservation.started,
        })
    }

    fn status_of(&self, recording_id: &str) -> Option<RecordingStatus> {
        self.active.get(recording_id).map(|r| r.status)
    }

    /// Drop the reservation and remember how it ended.
    fn finish(
        &mut self,
        recording_id: &str,
        status: RecordingStatus,
        exit_code: Option<i32>,
    ) -> Option<RecordingSnapshot> {
        let reservation = self.active.remove(recording_id)?;
        let mut snapshot = reservation.snapshot(recording_id);
        snapshot.is_recording = false;
        snapshot.status = Some(status);
        snapshot.exit_code = exit_code;

        if self.recent_cap > 0 {
            self.recent.retain(|s| s.recording_id != recording_id);
            if self.recent.len() >= self.recent_cap {
                self.recent.pop_front();
            }
            self.recent.push_back(snapshot.clone());
        }
        Some(snapshot)
    }

    fn snapshot(&self, recording_id: &str) -> RecordingSnapshot {
        if let Some(reservation) = self.active.get(recording_id) {
            return reservation.snapshot(recording_id);
        }
        self.recent
            .iter()
            .rev()
            .find(|s| s.recording_id == recording_id)
            .cloned()
            .unwrap_or_else(|| RecordingSnapshot::unknown(recording_id))
    }

    fn list(&self) -> Vec<RecordingSnapshot> {
        let mut snapshots: Vec<_> = self
            .active
            .iter()
            .map(|(id, reservation)| reservation.snapshot(id))
            .collect();
        snapshots.sort_by_key(|s| s.started_at);
        snapshots
    }

    fn stoppable_ids(&self) -> Vec<String> {
        self.active
            .iter()
            .filter(|(_, r)| r.status != RecordingStatus::Stopping)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Shared pieces the stop and monitor tasks need after the request that
/// created them has returned.
#[derive(Clone)]
struct Shared {
    store: Arc<Mutex<ReservationStore>>,
    log: Arc<RecordingLog>,
    escalator: ShutdownEscalator,
    settle_delay: Duration,
}

/// Starts, stops and reports on encoder subprocesses.
pub struct RecordingOrchestrator<L: EncoderLauncher = FfmpegLauncher> {
    config: OrchestratorConfig,
    launcher: L,
    shared: Shared,
}

impl<L: EncoderLauncher> RecordingOrchestrator<L> {
    /// Orchestrator over `config.recordings_root`, created if missing.
    #[track_caller]
    pub fn new(config: OrchestratorConfig, launcher: L) -> CoreResult<Self> {
        fs::create_dir_all(&config.recordings_root).map_err(|e| RelayError::InvalidOutputPath {
            reason: format!(
                "Cannot create recordings root {}: {e}",
                config.recordings_root.display()
            ),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let log_path = config
            .log_path
            .clone()
            .unwrap_or_else(|| config.recordings_root.join(RECORDING_LOG_FILE));

        let shared = Shared {
            store: Arc::new(Mutex::new(ReservationStore::new(config.recent_outcomes))),
            log: Arc::new(RecordingLog::new(log_path)),
            escalator: ShutdownEscalator::new(config.grace_period, config.kill_wait),
            settle_delay: config.settle_delay,
        };

        info!(
            root = ?config.recordings_root,
            max_concurrent = config.max_concurrent,
            input = %config.local_stream_url,
            "Recording orchestrator ready"
        );

        Ok(Self {
            config,
            launcher,
            shared,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Active encoder cap.
    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// The completed-recordings log.
    pub fn log(&self) -> &RecordingLog {
        &self.shared.log
    }

    /// Number of active reservations, stopping ones included.
    pub async fn active_count(&self) -> usize {
        self.shared.store.lock().await.active_count()
    }

    /// Validate, reserve a slot and spawn the encoder. Returns as soon as the
    /// process is running.
    #[instrument(skip(self, request), fields(recording_id = %request.recording_id))]
    pub async fn start(&self, request: StartRequest) -> CoreResult<RecordingStarted> {
        validate_recording_id(&request.recording_id)?;
        let output_dir = resolve_output_dir(&self.config.recordings_root, request.video_path.as_deref())?;
        let quality = resolve_quality(request.quality.as_deref());
        let trigger = if request.motion_triggered {
            RecordingTrigger::Motion
        } else {
            RecordingTrigger::Manual
        };

        if let Some(url) = request.stream_url.as_deref() {
            debug!(ignored_stream_url = %url, "Client stream url ignored");
        }

        tokio::fs::create_dir_all(&output_dir).await?;

        let recording_id = request.recording_id;
        let mut store = self.shared.store.lock().await;
        store.admit(&recording_id, self.config.max_concurrent)?;

        let started_at = Utc::now();
        let filename = recording_filename(
            trigger,
            &recording_id,
            started_at,
            &self.config.container_extension,
        );
        let output_path = output_dir.join(&filename);

        let (stop_tx, stop_rx) = oneshot::channel();
        store.active.insert(
            recording_id.clone(),
            Reservation {
                output_path: output_path.clone(),
                filename: filename.clone(),
                quality,
                trigger,
                started_at,
                started: Instant::now(),
                status: RecordingStatus::Starting,
                stop_tx: Some(stop_tx),
            },
        );

        let job = EncoderJob {
            input_url: self.config.local_stream_url.clone(),
            output_path: output_path.clone(),
            quality,
            max_duration: self.config.max_duration,
        };
        let mut command = self.launcher.command(&job);
        command.kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                store.active.remove(&recording_id);
                error!(error = %e, "Encoder spawn failed");
                return Err(RelayError::SpawnFailed {
                    source: e,
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        };

        if let Some(reservation) = store.active.get_mut(&recording_id) {
            reservation.status = RecordingStatus::Recording;
        }
        let active = store.active_count();
        drop(store);

        info!(
            pid = child.id(),
            filename = %filename,
            quality = quality.name,
            trigger = trigger.as_str(),
            active,
            "Recording started"
        );

        let monitored = MonitoredJob {
            output_path: output_path.clone(),
            trigger,
            quality,
            watchdog: self.config.max_duration + self.config.grace_period,
        };
        tokio::spawn(monitor(
            self.shared.clone(),
            recording_id.clone(),
            monitored,
            child,
            stop_rx,
        ));

        Ok(RecordingStarted {
            recording_id,
            filename,
            output_path,
            quality: quality.name,
            started_at,
        })
    }

    /// Stop a recording, wait for the encoder to finish the file, and
    /// report on it. The reservation is always released.
    ///
    /// The completion runs in its own task, so a caller that gives up
    /// waiting never leaves the reservation stuck in `stopping`.
    #[instrument(skip(self))]
    pub async fn stop(&self, recording_id: &str) -> CoreResult<RecordingStopped> {
        // A malformed id can never have been reserved.
        if validate_recording_id(recording_id).is_err() {
            return Err(RelayError::RecordingNotFound {
                recording_id: recording_id.to_string(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let ticket = self.shared.store.lock().await.begin_stop(recording_id)?;
        info!("Stopping recording");

        let task = tokio::spawn(complete_stop(
            self.shared.clone(),
            recording_id.to_string(),
            ticket,
        ));

        task.await.map_err(|e| RelayError::Io {
            source: std::io::Error::other(format!("stop task failed: {e}")),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Current view of `recording_id`. Unknown ids are reported as not
    /// recording.
    pub async fn status(&self, recording_id: &str) -> RecordingSnapshot {
        self.shared.store.lock().await.snapshot(recording_id)
    }

    /// Every active recording, oldest first.
    pub async fn list(&self) -> Vec<RecordingSnapshot> {
        self.shared.store.lock().await.list()
    }

    /// Stop every active recording, e.g. on service shutdown.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) -> Vec<RecordingStopped> {
        let ids = self.shared.store.lock().await.stoppable_ids();
        if ids.is_empty() {
            return Vec::new();
        }

        info!(count = ids.len(), "Stopping all recordings");
        let results = join_all(ids.iter().map(|id| self.stop(id))).await;

        results
            .into_iter()
            .zip(ids)
            .filter_map(|(result, id)| match result {
                Ok(stopped) => Some(stopped),
                Err(e) => {
                    warn!(recording_id = %id, error = %e, "Stop during shutdown failed");
                    None
                }
            })
            .collect()
    }
}

async fn complete_stop(shared: Shared, recording_id: String, ticket: StopTicket) -> RecordingStopped {
    let outcome = request_shutdown(&shared, &recording_id, ticket.stop_tx).await;

    sleep(shared.settle_delay).await;

    let file_size = match tokio::fs::metadata(&ticket.output_path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!(
                recording_id = %recording_id,
                path = ?ticket.output_path,
                error = %e,
                "Recording file not readable after stop"
            );
            0
        }
    };
    let duration_seconds = ticket.started.elapsed().as_secs_f64();
    let final_status = if file_size > 0 {
        RecordingStatus::Completed
    } else {
        RecordingStatus::Failed
    };
    let exit_code = outcome.and_then(|o| o.exit_status()).and_then(|s| s.code());

    shared
        .store
        .lock()
        .await
        .finish(&recording_id, final_status, exit_code);

    let shutdown = outcome.map(|o| o.label()).unwrap_or("unknown");
    info!(
        recording_id = %recording_id,
        filename = %ticket.filename,
        file_size,
        duration_seconds,
        shutdown,
        "Recording stopped"
    );

    let entry = RecordingLogEntry {
        recording_id: recording_id.clone(),
        filename: ticket.filename.clone(),
        file_size,
        duration_seconds,
        trigger: ticket.trigger,
        quality: ticket.quality.name.to_string(),
        completed_at: Utc::now(),
    };
    if let Err(e) = shared.log.append(entry).await {
        warn!(recording_id = %recording_id, error = %e, "Recording log append failed");
    }

    RecordingStopped {
        recording_id,
        filename: ticket.filename,
        file_size,
        duration_seconds,
        shutdown,
    }
}

/// Ask the monitor task to escalate and wait for its answer, bounded.
async fn request_shutdown(
    shared: &Shared,
    recording_id: &str,
    stop_tx: Option<oneshot::Sender<StopReply>>,
) -> Option<ShutdownOutcome> {
    let Some(stop_tx) = stop_tx else {
        warn!(recording_id, "No stop channel for recording");
        return None;
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if stop_tx.send(reply_tx).is_err() {
        warn!(recording_id, "Encoder monitor already gone");
        return None;
    }

    let bound = shared.escalator.bound() + STOP_REPLY_MARGIN;
    match timeout(bound, reply_rx).await {
        Ok(Ok(Ok(outcome))) => Some(outcome),
        Ok(Ok(Err(e))) => {
            warn!(recording_id, error = %e, "Encoder shutdown failed");
            None
        }
        Ok(Err(_)) => {
            warn!(recording_id, "Encoder monitor dropped the stop request");
            None
        }
        Err(_) => {
            warn!(recording_id, bound_ms = bound.as_millis(), "Encoder shutdown timed out");
            None
        }
    }
}

/// What the monitor needs to log a recording that ends on its own.
struct MonitoredJob {
    output_path: PathBuf,
    trigger: RecordingTrigger,
    quality: QualityPreset,
    watchdog: Duration,
}

enum MonitorWake {
    StopRequested(Option<StopReply>),
    Exited(std::io::Result<ExitStatus>),
    Watchdog,
}

/// Sole owner of one encoder process.
async fn monitor(
    shared: Shared,
    recording_id: String,
    job: MonitoredJob,
    mut child: Child,
    mut stop_rx: oneshot::Receiver<StopReply>,
) {
    let watchdog = job.watchdog;
    let wake = tokio::select! {
        biased;
        request = &mut stop_rx => MonitorWake::StopRequested(request.ok()),
        status = child.wait() => MonitorWake::Exited(status),
        _ = sleep(watchdog) => MonitorWake::Watchdog,
    };

    let outcome = match wake {
        MonitorWake::StopRequested(Some(reply)) => {
            let outcome = shared.escalator.shutdown(&mut child).await;
            let _ = reply.send(outcome);
            return;
        }
        MonitorWake::StopRequested(None) => {
            // Orchestrator gone; make sure the encoder does not outlive it.
            if let Err(e) = shared.escalator.shutdown(&mut child).await {
                warn!(recording_id = %recording_id, error = %e, "Orphaned encoder shutdown failed");
            }
            return;
        }
        MonitorWake::Exited(Ok(status)) => ShutdownOutcome::AlreadyExited(status),
        MonitorWake::Exited(Err(e)) => {
            warn!(recording_id = %recording_id, error = %e, "Waiting on encoder failed");
            match shared.escalator.shutdown(&mut child).await {
                Ok(outcome) => outcome,
                Err(_) => ShutdownOutcome::Forced(None),
            }
        }
        MonitorWake::Watchdog => {
            warn!(
                recording_id = %recording_id,
                limit_secs = watchdog.as_secs(),
                "Encoder exceeded its run time, terminating"
            );
            match shared.escalator.shutdown(&mut child).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(recording_id = %recording_id, error = %e, "Watchdog shutdown failed");
                    ShutdownOutcome::Forced(None)
                }
            }
        }
    };

    let mut store = shared.store.lock().await;
    if store.status_of(&recording_id) == Some(RecordingStatus::Stopping) {
        // A stop took the channel before we got here; answer it instead of
        // releasing, since the stop path owns completion.
        drop(store);
        if let Ok(reply) = stop_rx.await {
            let _ = reply.send(Ok(outcome));
        }
        return;
    }

    let exit_status = outcome.exit_status();
    let succeeded = exit_status.is_some_and(|s| s.success());
    let final_status = if succeeded {
        RecordingStatus::Completed
    } else {
        RecordingStatus::Failed
    };
    let finished = store.finish(&recording_id, final_status, exit_status.and_then(|s| s.code()));
    drop(store);

    let Some(finished) = finished else {
        return;
    };

    if !succeeded {
        warn!(
            recording_id = %recording_id,
            exit_code = ?finished.exit_code,
            outcome = outcome.label(),
            "Encoder exited unexpectedly"
        );
        return;
    }

    info!(recording_id = %recording_id, "Encoder reached its run time");
    sleep(shared.settle_delay).await;
    let file_size = tokio::fs::metadata(&job.output_path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0);

    let entry = RecordingLogEntry {
        recording_id: recording_id.clone(),
        filename: finished.filename.unwrap_or_default(),
        file_size,
        duration_seconds: finished.duration_seconds.unwrap_or_default(),
        trigger: job.trigger,
        quality: job.quality.name.to_string(),
        completed_at: Utc::now(),
    };
    if let Err(e) = shared.log.append(entry).await {
        warn!(recording_id = %recording_id, error = %e, "Recording log append failed");
    }
}
