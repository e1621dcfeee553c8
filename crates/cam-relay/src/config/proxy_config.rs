use cam_relay_core::{
    DEFAULT_ALLOWED_PORTS, DEFAULT_DDNS_SUFFIXES, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW,
    FetchConfig, GuardPolicy, RateLimitConfig,
};

use std::{collections::BTreeMap, time::Duration};

use crate::config::{DEFAULT_SWEEP_INTERVAL_SECS, millis};
use serde::{Deserialize, Serialize};

/// Streaming proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Bearer tokens keyed by principal name.
    pub tokens: BTreeMap<String, String>,
    /// Requests admitted per principal per window.
    pub rate_limit_max_requests: u32,
    /// Rate limit window length.
    pub rate_limit_window_secs: u64,
    /// How often idle rate limit buckets are swept.
    pub sweep_interval_secs: u64,
    /// Destination ports that may be proxied.
    pub allowed_ports: Vec<u16>,
    /// Dynamic DNS suffixes exempt from the private-address rule.
    pub ddns_suffixes: Vec<String>,
    /// Literal LAN prefixes exempt from the private-address rule.
    pub lan_prefixes: Vec<String>,
    /// Upstream connect deadline.
    pub connect_timeout_ms: u64,
    /// Whole-request deadline for `HEAD` probes.
    pub head_timeout_ms: u64,
    /// Response header deadline for streaming `GET`.
    pub stream_header_timeout_ms: u64,
    /// Attempts per proxied request, including the first.
    pub max_attempts: u32,
    /// Backoff increment per retry.
    pub retry_step_ms: u64,
    /// Backoff ceiling.
    pub retry_cap_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let fetch = FetchConfig::default();
        Self {
            tokens: BTreeMap::new(),
            rate_limit_max_requests: DEFAULT_MAX_REQUESTS,
            rate_limit_window_secs: DEFAULT_WINDOW.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            allowed_ports: DEFAULT_ALLOWED_PORTS.to_vec(),
            ddns_suffixes: DEFAULT_DDNS_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            lan_prefixes: Vec::new(),
            connect_timeout_ms: millis(fetch.connect_timeout),
            head_timeout_ms: millis(fetch.head_timeout),
            stream_header_timeout_ms: millis(fetch.stream_header_timeout),
            max_attempts: fetch.max_attempts,
            retry_step_ms: millis(fetch.backoff_step),
            retry_cap_ms: millis(fetch.backoff_cap),
        }
    }
}

impl ProxyConfig {
    /// Rate limiter settings.
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    /// URL guard allow-lists.
    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            allowed_ports: self.allowed_ports.clone(),
            ddns_suffixes: self.ddns_suffixes.clone(),
            lan_prefixes: self.lan_prefixes.clone(),
        }
    }

    /// Upstream client timeouts and retry policy.
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            head_timeout: Duration::from_millis(self.head_timeout_ms),
            stream_header_timeout: Duration::from_millis(self.stream_header_timeout_ms),
            max_attempts: self.max_attempts,
            backoff_step: Duration::from_millis(self.retry_step_ms),
            backoff_cap: Duration::from_millis(self.retry_cap_ms),
        }
    }

    /// Interval between rate limit sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
