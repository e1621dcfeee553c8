use crate::{RelayError, resolve_output_dir, validate_recording_id};

use tempfile::tempdir;

/// WHAT: Recording ids follow the 1-64 `[A-Za-z0-9_-]` rule
/// WHY: Ids end up in filenames and must not carry separators
#[test]
fn given_various_ids_when_validating_then_only_safe_ids_accepted() {
    // Given
    let too_long = "a".repeat(65);
    let longest = "b".repeat(64);

    // When/Then
    assert!(validate_recording_id("porch-cam_01").is_ok());
    assert!(validate_recording_id(&longest).is_ok());
    for bad in ["", too_long.as_str(), "a/b", "a\\b", "a b", "..", "caméra", "id\0"] {
        assert!(
            matches!(
                validate_recording_id(bad),
                Err(RelayError::InvalidRecordingId { .. })
            ),
            "{bad:?}"
        );
    }
}

/// WHAT: No candidate resolves to the canonical root
/// WHY: video_path is optional
#[test]
#[allow(clippy::unwrap_used)]
fn given_no_candidate_when_resolving_then_canonical_root() {
    // Given
    let root = tempdir().unwrap();

    // When
    let resolved = resolve_output_dir(root.path(), None).unwrap();
    let blank = resolve_output_dir(root.path(), Some("  ")).unwrap();

    // Then
    assert_eq!(resolved, root.path().canonicalize().unwrap());
    assert_eq!(blank, resolved);
}

/// WHAT: Relative and absolute-inside paths resolve under the root
/// WHY: Both forms are sent by existing dashboards
#[test]
#[allow(clippy::unwrap_used)]
fn given_paths_inside_root_when_resolving_then_joined_under_root() {
    // Given
    let root = tempdir().unwrap();
    let canonical = root.path().canonicalize().unwrap();
    let absolute = canonical.join("garage").to_string_lossy().into_owned();

    // When
    let relative = resolve_output_dir(root.path(), Some("clips/2024")).unwrap();
    let backslashed = resolve_output_dir(root.path(), Some("clips\\2025")).unwrap();
    let inside = resolve_output_dir(root.path(), Some(&absolute)).unwrap();

    // Then: Nothing is created on disk
    assert_eq!(relative, canonical.join("clips").join("2024"));
    assert_eq!(backslashed, canonical.join("clips").join("2025"));
    assert_eq!(inside, canonical.join("garage"));
    assert!(!relative.exists());
}

/// WHAT: Traversal is rejected for both separator styles
/// WHY: A Windows-style `..\` must not slip past a `/`-only check
#[test]
#[allow(clippy::unwrap_used)]
fn given_traversal_attempts_when_resolving_then_path_traversal() {
    // Given
    let root = tempdir().unwrap();

    // When/Then
    for bad in [
        "../etc",
        "clips/../../etc",
        "..\\windows",
        "clips\\..\\..\\secrets",
        "/etc",
        "/tmp/elsewhere",
    ] {
        assert!(
            matches!(
                resolve_output_dir(root.path(), Some(bad)),
                Err(RelayError::PathTraversal { .. })
            ),
            "{bad}"
        );
    }
}

/// WHAT: NUL bytes are a validation error
/// WHY: They truncate paths at the OS boundary
#[test]
#[allow(clippy::unwrap_used)]
fn given_nul_byte_when_resolving_then_invalid_output_path() {
    // Given
    let root = tempdir().unwrap();

    // When
    let result = resolve_output_dir(root.path(), Some("clips\0/x"));

    // Then
    assert!(matches!(result, Err(RelayError::InvalidOutputPath { .. })));
}

/// WHAT: A symlink leading out of the root is rejected
/// WHY: Canonical containment, not string prefixes, decides
#[cfg(unix)]
#[test]
#[allow(clippy::unwrap_used)]
fn given_symlink_escape_when_resolving_then_path_traversal() {
    // Given: root/escape -> a directory outside the root
    let root = tempdir().unwrap();
    let outside = tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();
    std::fs::create_dir(root.path().join("real")).unwrap();

    // When
    let escaped = resolve_output_dir(root.path(), Some("escape/clips"));
    let real = resolve_output_dir(root.path(), Some("real/clips"));

    // Then
    assert!(matches!(escaped, Err(RelayError::PathTraversal { .. })));
    assert!(real.is_ok());
}
