//! JSON log of completed recordings.

use crate::{CoreResult, RelayError, recording::RecordingTrigger};

use std::{
    fs,
    io::{ErrorKind, Write},
    panic::Location,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use error_location::ErrorLocation;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Newest entries kept; older ones are dropped on append.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Default file name inside the recordings root.
pub const RECORDING_LOG_FILE: &str = "recordings.json";

/// One completed recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingLogEntry {
    /// Caller-chosen recording id.
    pub recording_id: String,
    /// Output file name.
    pub filename: String,
    /// Output size in bytes; 0 if the file could not be stat'ed.
    pub file_size: u64,
    /// Wall-clock run time.
    pub duration_seconds: f64,
    /// What started the recording.
    pub trigger: RecordingTrigger,
    /// Quality preset name.
    pub quality: String,
    /// When the stop completed.
    pub completed_at: DateTime<Utc>,
}

/// Append-only, size-capped recording log backed by a single JSON file.
pub struct RecordingLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordingLog {
    /// Log stored at `path`. Nothing is touched until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry`, keeping the newest [`MAX_LOG_ENTRIES`].
    ///
    /// A corrupt log file is replaced rather than blocking new entries.
    #[instrument(skip(self, entry), fields(recording_id = %entry.recording_id))]
    pub async fn append(&self, entry: RecordingLogEntry) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();

        let written = tokio::task::spawn_blocking(move || {
            let mut entries = read_entries(&path).unwrap_or_else(|e| {
                warn!(path = ?path, error = %e, "Recording log unreadable, starting fresh");
                Vec::new()
            });
            entries.push(entry);
            if entries.len() > MAX_LOG_ENTRIES {
                let excess = entries.len() - MAX_LOG_ENTRIES;
                entries.drain(..excess);
            }
            write_entries(&path, &entries).map(|()| entries.len())
        })
        .await
        .map_err(|e| RelayError::RecordingLog {
            reason: format!("log writer task failed: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })??;

        debug!(entries = written, "Recording log updated");
        Ok(())
    }

    /// All entries, oldest first. A missing file is an empty log.
    pub async fn entries(&self) -> CoreResult<Vec<RecordingLogEntry>> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || read_entries(&path))
            .await
            .map_err(|e| RelayError::RecordingLog {
                reason: format!("log reader task failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?
    }
}

#[track_caller]
fn read_entries(path: &Path) -> CoreResult<Vec<RecordingLogEntry>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&contents).map_err(|e| RelayError::RecordingLog {
        reason: format!("Failed to parse {}: {e}", path.display()),
        location: ErrorLocation::from(Location::caller()),
    })
}

#[track_caller]
fn write_entries(path: &Path, entries: &[RecordingLogEntry]) -> CoreResult<()> {
    let contents = serde_json::to_vec_pretty(entries).map_err(|e| RelayError::RecordingLog {
        reason: format!("Failed to serialize log: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut temp_file = fs::File::create(&temp_path)?;
    temp_file.write_all(&contents)?;
    temp_file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}
