//! Graceful-then-forced subprocess termination.

use crate::CoreResult;

use std::{process::ExitStatus, time::Duration};

use tokio::{process::Child, time::timeout};
use tracing::{debug, warn};

/// Default wait after the graceful signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Default wait for the kernel to reap a killed process.
pub const DEFAULT_KILL_WAIT: Duration = Duration::from_secs(2);

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// It had exited before any signal was sent.
    AlreadyExited(ExitStatus),
    /// It exited within the grace period after SIGINT.
    Graceful(ExitStatus),
    /// It was killed. `None` if it still was not reaped after the kill wait.
    Forced(Option<ExitStatus>),
}

impl ShutdownOutcome {
    /// Exit status, when one was observed.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            ShutdownOutcome::AlreadyExited(status) | ShutdownOutcome::Graceful(status) => {
                Some(*status)
            }
            ShutdownOutcome::Forced(status) => *status,
        }
    }

    /// Short label for logs and responses.
    pub fn label(&self) -> &'static str {
        match self {
            ShutdownOutcome::AlreadyExited(_) => "already_exited",
            ShutdownOutcome::Graceful(_) => "graceful",
            ShutdownOutcome::Forced(_) => "forced",
        }
    }
}

/// Two-phase terminator: SIGINT and wait, then SIGKILL and reap.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownEscalator {
    /// Wait after SIGINT before escalating.
    pub grace_period: Duration,
    /// Wait for reaping after SIGKILL.
    pub kill_wait: Duration,
}

impl Default for ShutdownEscalator {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            kill_wait: DEFAULT_KILL_WAIT,
        }
    }
}

impl ShutdownEscalator {
    /// Escalator with explicit timings.
    pub fn new(grace_period: Duration, kill_wait: Duration) -> Self {
        Self {
            grace_period,
            kill_wait,
        }
    }

    /// Upper bound on how long [`shutdown`](Self::shutdown) can take.
    pub fn bound(&self) -> Duration {
        self.grace_period + self.kill_wait
    }

    /// Terminate `child`. Safe to call on a process that already exited.
    pub async fn shutdown(&self, child: &mut Child) -> CoreResult<ShutdownOutcome> {
        if let Some(status) = child.try_wait()? {
            debug!(%status, "Process already exited");
            return Ok(ShutdownOutcome::AlreadyExited(status));
        }

        if let Some(status) = self.interrupt(child).await? {
            return Ok(ShutdownOutcome::Graceful(status));
        }

        if let Some(status) = child.try_wait()? {
            return Ok(ShutdownOutcome::Graceful(status));
        }

        warn!(
            pid = child.id(),
            grace_ms = self.grace_period.as_millis(),
            "Process ignored interrupt, killing"
        );
        if let Err(e) = child.start_kill() {
            // Lost a race with a natural exit.
            debug!(error = %e, "Kill signal not delivered");
        }

        match timeout(self.kill_wait, child.wait()).await {
            Ok(status) => Ok(ShutdownOutcome::Forced(Some(status?))),
            Err(_) => {
                warn!(
                    pid = child.id(),
                    wait_ms = self.kill_wait.as_millis(),
                    "Killed process not reaped in time"
                );
                Ok(ShutdownOutcome::Forced(None))
            }
        }
    }

    #[cfg(unix)]
    async fn interrupt(&self, child: &mut Child) -> CoreResult<Option<ExitStatus>> {
        let Some(pid) = child.id() else {
            return Ok(None);
        };

        // SAFETY: `pid` belongs to a child we own and have not reaped yet.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            debug!(pid, "Interrupt not delivered");
            return Ok(None);
        }

        match timeout(self.grace_period, child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_) => Ok(None),
        }
    }

    #[cfg(not(unix))]
    async fn interrupt(&self, _child: &mut Child) -> CoreResult<Option<ExitStatus>> {
        Ok(None)
    }
}
