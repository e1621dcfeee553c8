mod rate_limiter;
mod url_guard;
mod validation;

pub use {
    rate_limiter::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW, RateLimitConfig, RateLimiter},
    url_guard::{
        AddressClass, DEFAULT_ALLOWED_PORTS, DEFAULT_DDNS_SUFFIXES, GuardPolicy, Resolver,
        StreamTarget, SystemResolver, UrlGuard, classify,
    },
    validation::{MAX_RECORDING_ID_LEN, resolve_output_dir, validate_recording_id},
};
