use serde::Serialize;

/// Encoder settings for one named quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityPreset {
    /// Preset name as accepted by `start`.
    pub name: &'static str,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frames per second.
    pub frame_rate: u32,
    /// Target video bitrate in kbit/s.
    pub bitrate_kbps: u32,
}

/// Preset used when the request names none or an unknown one.
pub const DEFAULT_QUALITY: &str = "medium";

/// Known presets.
pub const QUALITY_PRESETS: [QualityPreset; 3] = [
    QualityPreset {
        name: "low",
        width: 640,
        height: 480,
        frame_rate: 15,
        bitrate_kbps: 500,
    },
    QualityPreset {
        name: "medium",
        width: 1280,
        height: 720,
        frame_rate: 20,
        bitrate_kbps: 1000,
    },
    QualityPreset {
        name: "high",
        width: 1920,
        height: 1080,
        frame_rate: 30,
        bitrate_kbps: 2500,
    },
];

/// Look up a preset by case-insensitive name, falling back to
/// [`DEFAULT_QUALITY`].
pub fn resolve_quality(name: Option<&str>) -> QualityPreset {
    let wanted = name.map(str::trim).unwrap_or(DEFAULT_QUALITY);
    QUALITY_PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(wanted))
        .or_else(|| QUALITY_PRESETS.iter().find(|preset| preset.name == DEFAULT_QUALITY))
        .copied()
        .unwrap_or(QUALITY_PRESETS[1])
}

impl QualityPreset {
    /// Bitrate as an encoder argument, e.g. `1000k`.
    pub fn bitrate_arg(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }

    /// Scale filter, e.g. `scale=1280:720`.
    pub fn scale_filter(&self) -> String {
        format!("scale={}:{}", self.width, self.height)
    }
}
