use cam_relay_core::{CoreResult, RelayError};

use std::{collections::BTreeMap, panic::Location};

use axum::http::{HeaderMap, header};
use error_location::ErrorLocation;

/// Bearer tokens accepted by the proxy, keyed by principal name.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    entries: Vec<(String, Vec<u8>)>,
}

impl TokenTable {
    /// Build a table from `name -> token` pairs.
    pub fn new(tokens: &BTreeMap<String, String>) -> Self {
        let entries = tokens
            .iter()
            .map(|(name, token)| (name.clone(), token.as_bytes().to_vec()))
            .collect();
        Self { entries }
    }

    /// Principal owning `candidate`, if any.
    ///
    /// Every entry is compared so the time taken does not depend on which
    /// token matched.
    pub fn principal_for(&self, candidate: &str) -> Option<&str> {
        let mut found = None;
        for (name, token) in &self.entries {
            if constant_time_eq(token, candidate.as_bytes()) && found.is_none() {
                found = Some(name.as_str());
            }
        }
        found
    }

    /// Resolve the principal from an `Authorization: Bearer` header, falling
    /// back to a `token` query parameter for clients that cannot set headers
    /// (e.g. `<img>` tags).
    #[track_caller]
    pub fn authenticate(&self, headers: &HeaderMap, query_token: Option<&str>) -> CoreResult<String> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .or(query_token)
            .filter(|token| !token.is_empty());

        presented
            .and_then(|token| self.principal_for(token))
            .map(str::to_string)
            .ok_or_else(|| RelayError::Unauthorized {
                location: ErrorLocation::from(Location::caller()),
            })
    }
}

/// Compare two byte strings without an early exit on the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}
