//! Parameter-name keys and value enumerations
//!
//! Keys are matched case-insensitively, matching how the runtime itself
//! looks them up.

use std::ffi::CStr;

/// Feature creation flags (signed setter)
pub const FEATURE_CREATE_FLAGS: &CStr = c"DLSS.Feature.Create.Flags";

/// Selected performance/quality value (signed setter)
pub const PERF_QUALITY_VALUE: &CStr = c"PerfQualityValue";

/// Full-resolution width
pub const WIDTH: &CStr = c"Width";

/// Full-resolution height
pub const HEIGHT: &CStr = c"Height";

/// Recommended render width returned to the application
pub const OUT_WIDTH: &CStr = c"OutWidth";

/// Recommended render height returned to the application
pub const OUT_HEIGHT: &CStr = c"OutHeight";

/// Render preset hint keys, in tier order DLAA, Quality, Balanced,
/// Performance, UltraPerformance
pub const PRESET_HINT_KEYS: [&CStr; 5] = [
    c"DLSS.Hint.Render.Preset.DLAA",
    c"DLSS.Hint.Render.Preset.Quality",
    c"DLSS.Hint.Render.Preset.Balanced",
    c"DLSS.Hint.Render.Preset.Performance",
    c"DLSS.Hint.Render.Preset.UltraPerformance",
];

/// Result code type returned by NGX entry points
pub type NgxResult = u32;

/// `NVSDK_NGX_Result_Success`
pub const NGX_RESULT_SUCCESS: NgxResult = 0x1;

/// `NVSDK_NGX_Result_Fail`
pub const NGX_RESULT_FAIL: NgxResult = 0xBAD0_0000;

/// Feature creation flag bits
pub mod feature_flags {
    pub const NONE: i32 = 0;
    pub const IS_HDR: i32 = 1 << 0;
    pub const MV_LOW_RES: i32 = 1 << 1;
    pub const MV_JITTERED: i32 = 1 << 2;
    pub const DEPTH_INVERTED: i32 = 1 << 3;
    pub const RESERVED_0: i32 = 1 << 4;
    pub const DO_SHARPENING: i32 = 1 << 5;
    pub const AUTO_EXPOSURE: i32 = 1 << 6;
}

/// Performance/quality value as sent through `PerfQualityValue`
///
/// The discriminant is the ordinal used to index the ratio table.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PerfQuality {
    MaxPerf = 0,
    Balanced = 1,
    MaxQuality = 2,
    UltraPerformance = 3,
    UltraQuality = 4,
}

impl PerfQuality {
    /// All values in ordinal order
    pub const ALL: [PerfQuality; 5] = [
        PerfQuality::MaxPerf,
        PerfQuality::Balanced,
        PerfQuality::MaxQuality,
        PerfQuality::UltraPerformance,
        PerfQuality::UltraQuality,
    ];

    /// Convert a raw value, rejecting anything outside the known range
    pub fn from_raw(value: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }
}

/// Render preset hint values
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderPreset {
    /// Let the runtime decide; never injected
    #[default]
    Default = 0,
    A = 1,
    B = 2,
    C = 3,
    D = 4,
    E = 5,
    F = 6,
}

impl RenderPreset {
    pub fn value(self) -> u32 {
        self as u32
    }

    /// Parse a preset selector (`Default`, `A`..`F`), case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        let preset = match name.trim().to_ascii_uppercase().as_str() {
            "DEFAULT" => RenderPreset::Default,
            "A" => RenderPreset::A,
            "B" => RenderPreset::B,
            "C" => RenderPreset::C,
            "D" => RenderPreset::D,
            "E" => RenderPreset::E,
            "F" => RenderPreset::F,
            _ => return None,
        };
        Some(preset)
    }
}

/// Compare a parameter name against a known key, ignoring ASCII case
pub fn name_matches(name: &CStr, key: &CStr) -> bool {
    name.to_bytes().eq_ignore_ascii_case(key.to_bytes())
}
