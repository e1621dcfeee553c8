mod escalator;
mod orchestrator;
mod quality;
mod recording_log;

pub use {
    escalator::{DEFAULT_GRACE_PERIOD, DEFAULT_KILL_WAIT, ShutdownEscalator, ShutdownOutcome},
    orchestrator::{
        DEFAULT_LOCAL_STREAM_URL, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_DURATION,
        DEFAULT_SETTLE_DELAY, EncoderJob, EncoderLauncher, FfmpegLauncher, OrchestratorConfig,
        RecordingOrchestrator, RecordingSnapshot, RecordingStarted, RecordingStatus,
        RecordingStopped, RecordingTrigger, StartRequest, recording_filename,
    },
    quality::{DEFAULT_QUALITY, QUALITY_PRESETS, QualityPreset, resolve_quality},
    recording_log::{MAX_LOG_ENTRIES, RECORDING_LOG_FILE, RecordingLog, RecordingLogEntry},
};
