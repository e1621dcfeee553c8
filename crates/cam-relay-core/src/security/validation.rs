//! Input validation for recording requests.
//!
//! Everything here runs before the orchestrator touches the filesystem or
//! spawns anything.

use crate::{CoreResult, RelayError};

use std::{
    panic::Location,
    path::{Component, Path, PathBuf},
};

use error_location::ErrorLocation;

/// Longest accepted recording id.
pub const MAX_RECORDING_ID_LEN: usize = 64;

/// Check that `id` is 1 to 64 characters of `[A-Za-z0-9_-]`.
#[track_caller]
pub fn validate_recording_id(id: &str) -> CoreResult<()> {
    let reason = if id.is_empty() {
        Some("id is empty".to_string())
    } else if id.len() > MAX_RECORDING_ID_LEN {
        Some(format!("id exceeds {MAX_RECORDING_ID_LEN} characters"))
    } else if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        Some("id may only contain letters, digits, '_' and '-'".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RelayError::InvalidRecordingId {
            reason,
            location: ErrorLocation::from(Location::caller()),
        }),
        None => Ok(()),
    }
}

/// Resolve a client-supplied output directory against the recordings root.
///
/// `candidate` may be relative to the root or an absolute path inside it.
/// Any `..` segment (with `/` or `\` separators) is rejected outright, and
/// the deepest existing ancestor of the result must canonicalize inside the
/// canonical root so symlinks cannot be used to escape. Nothing is created.
#[track_caller]
pub fn resolve_output_dir(root: &Path, candidate: Option<&str>) -> CoreResult<PathBuf> {
    let caller = Location::caller();

    let canonical_root = root.canonicalize().map_err(|e| RelayError::InvalidOutputPath {
        reason: format!("recordings root unavailable: {e}"),
        location: ErrorLocation::from(caller),
    })?;

    let candidate = match candidate.map(str::trim) {
        None | Some("") => return Ok(canonical_root),
        Some(c) => c,
    };

    if candidate.contains('\0') {
        return Err(RelayError::InvalidOutputPath {
            reason: "path contains a NUL byte".to_string(),
            location: ErrorLocation::from(caller),
        });
    }

    let traversal = || RelayError::PathTraversal {
        location: ErrorLocation::from(caller),
    };

    if candidate.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(traversal());
    }

    let normalized = candidate.replace('\\', "/");
    let candidate_path = Path::new(&normalized);

    let relative: PathBuf = if candidate_path.has_root() {
        let stripped = candidate_path
            .strip_prefix(&canonical_root)
            .or_else(|_| candidate_path.strip_prefix(root));
        match stripped {
            Ok(rest) => rest.to_path_buf(),
            Err(_) => return Err(traversal()),
        }
    } else {
        candidate_path.to_path_buf()
    };

    let mut resolved = canonical_root.clone();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal());
            }
        }
    }

    let existing = resolved
        .ancestors()
        .find(|ancestor| ancestor.exists())
        .unwrap_or(canonical_root.as_path());
    let canonical_existing = existing.canonicalize().map_err(|e| RelayError::InvalidOutputPath {
        reason: format!("cannot inspect output path: {e}"),
        location: ErrorLocation::from(caller),
    })?;

    if !canonical_existing.starts_with(&canonical_root) {
        return Err(traversal());
    }

    Ok(resolved)
}
