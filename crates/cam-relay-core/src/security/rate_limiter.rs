use crate::{CoreResult, RelayError};

use std::{
    collections::HashMap,
    panic::Location,
    sync::Mutex,
    time::{Duration, Instant},
};

use error_location::ErrorLocation;
use tracing::{debug, warn};

/// Requests allowed per principal per window when not configured.
pub const DEFAULT_MAX_REQUESTS: u32 = 30;

/// Window length when not configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitBucket {
    count: u32,
    window_start: Instant,
}

/// Per-principal request window counter.
///
/// The bucket map is only reachable through `check` and `sweep`, each of
/// which holds the lock for a single read-modify-write.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admit or reject one request from `principal`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` with the time remaining in the current window
    /// once the principal has used up its allowance.
    #[track_caller]
    pub fn check(&self, principal: &str) -> CoreResult<()> {
        self.check_at(principal, Instant::now())
    }

    #[track_caller]
    pub(crate) fn check_at(&self, principal: &str, now: Instant) -> CoreResult<()> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        match buckets.get_mut(principal) {
            Some(bucket) if now.saturating_duration_since(bucket.window_start) <= self.config.window => {
                if bucket.count >= self.config.max_requests {
                    let elapsed = now.saturating_duration_since(bucket.window_start);
                    let retry_after = self.config.window.saturating_sub(elapsed);
                    warn!(principal, count = bucket.count, "Rate limit exceeded");
                    return Err(RelayError::RateLimited {
                        retry_after,
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
                bucket.count += 1;
            }
            _ => {
                buckets.insert(
                    principal.to_string(),
                    RateLimitBucket {
                        count: 1,
                        window_start: now,
                    },
                );
            }
        }

        Ok(())
    }

    /// Drop buckets whose window has expired. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();
        let window = self.config.window;
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.window_start) <= window);
        let removed = before - buckets.len();

        if removed > 0 {
            debug!(removed, remaining = buckets.len(), "Swept stale rate limit buckets");
        }

        removed
    }

    /// Number of principals currently tracked.
    pub fn tracked_principals(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
