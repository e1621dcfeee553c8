use crate::{DEFAULT_QUALITY, QUALITY_PRESETS, resolve_quality};

/// WHAT: Presets resolve by case-insensitive name, defaulting to medium
/// WHY: Unknown values from old dashboards must still record
#[test]
fn given_quality_names_when_resolving_then_preset_or_medium() {
    // Given/When
    let high = resolve_quality(Some("HIGH"));
    let low = resolve_quality(Some(" low "));
    let unknown = resolve_quality(Some("ultra"));
    let missing = resolve_quality(None);

    // Then
    assert_eq!((high.width, high.height, high.frame_rate, high.bitrate_kbps), (1920, 1080, 30, 2500));
    assert_eq!((low.width, low.height, low.frame_rate, low.bitrate_kbps), (640, 480, 15, 500));
    assert_eq!(unknown.name, DEFAULT_QUALITY);
    assert_eq!(missing, unknown);
    assert_eq!((missing.width, missing.height, missing.frame_rate), (1280, 720, 20));
}

/// WHAT: Preset helpers render encoder arguments
/// WHY: The launcher builds its command line from them
#[test]
fn given_preset_when_rendering_args_then_bitrate_and_scale() {
    // Given
    let medium = QUALITY_PRESETS[1];

    // When/Then
    assert_eq!(medium.bitrate_arg(), "1000k");
    assert_eq!(medium.scale_filter(), "scale=1280:720");
}
