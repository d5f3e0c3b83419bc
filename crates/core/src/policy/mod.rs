//! Override policy
//!
//! The user-facing override settings and the pure rewrite rules applied to
//! intercepted parameter traffic. Settings are published as immutable
//! snapshots: interceptors load the current `Arc` once per call and never
//! see a half-applied reload.

pub mod identity;
pub mod params;

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use ngxtweaks_sdk::layout::DEFAULT_LAYOUT_NAME;
use ngxtweaks_sdk::{PerfQuality, RenderPreset, PRESET_HINT_KEYS};

/// Tri-state override read from an integer setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Override {
    /// Leave the runtime's behavior alone (`0`)
    #[default]
    Default,
    /// Force the feature on (`>= 1`)
    ForceOn,
    /// Force the feature off (`< 0`)
    ForceOff,
}

impl Override {
    pub fn from_raw(value: i64) -> Self {
        match value {
            0 => Override::Default,
            v if v > 0 => Override::ForceOn,
            _ => Override::ForceOff,
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Override::Default => 0,
            Override::ForceOn => 1,
            Override::ForceOff => -1,
        }
    }
}

/// Quality tiers a render preset can be pinned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetTier {
    Dlaa,
    Quality,
    Balanced,
    Performance,
    UltraPerformance,
}

impl PresetTier {
    /// Injection order
    pub const ALL: [PresetTier; 5] = [
        PresetTier::Dlaa,
        PresetTier::Quality,
        PresetTier::Balanced,
        PresetTier::Performance,
        PresetTier::UltraPerformance,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Parameter key the preset is injected under
    pub fn hint_key(self) -> &'static std::ffi::CStr {
        PRESET_HINT_KEYS[self.index()]
    }

    pub fn label(self) -> &'static str {
        match self {
            PresetTier::Dlaa => "DLAA",
            PresetTier::Quality => "Quality",
            PresetTier::Balanced => "Balanced",
            PresetTier::Performance => "Performance",
            PresetTier::UltraPerformance => "UltraPerformance",
        }
    }
}

/// Render-scale ratio per quality tier, indexed by [`PerfQuality`] ordinal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityRatios([f32; 5]);

impl Default for QualityRatios {
    fn default() -> Self {
        Self([0.5, 0.58, 0.666_666_7, 0.333_333_34, 0.77])
    }
}

impl QualityRatios {
    pub fn get(&self, tier: PerfQuality) -> f32 {
        self.0[tier.ordinal()]
    }

    pub fn set(&mut self, tier: PerfQuality, ratio: f32) {
        self.0[tier.ordinal()] = ratio;
    }
}

/// A complete, immutable set of override settings
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideSettings {
    /// Log at debug level instead of warnings only
    pub debug_log: bool,
    /// Reload settings when the config file changes
    pub watch_config: bool,
    /// Render at full resolution regardless of tier
    pub force_dlaa: bool,
    /// Auto-exposure creation flag override
    pub auto_exposure: Override,
    /// On-screen indicator override
    pub dlss_hud: Override,
    /// Replace the application identity with a generic one
    pub override_app_id: bool,
    /// Apply [`OverrideSettings::ratios`] to recommended render sizes
    pub override_quality_levels: bool,
    pub ratios: QualityRatios,
    /// Pinned render preset per [`PresetTier`]
    pub presets: [RenderPreset; 5],
    /// Dispatch-table layout to validate parameter objects against
    pub layout: String,
}

impl Default for OverrideSettings {
    fn default() -> Self {
        Self {
            debug_log: true,
            watch_config: false,
            force_dlaa: false,
            auto_exposure: Override::Default,
            dlss_hud: Override::Default,
            override_app_id: false,
            override_quality_levels: false,
            ratios: QualityRatios::default(),
            presets: [RenderPreset::Default; 5],
            layout: DEFAULT_LAYOUT_NAME.to_string(),
        }
    }
}

impl OverrideSettings {
    pub fn preset(&self, tier: PresetTier) -> RenderPreset {
        self.presets[tier.index()]
    }
}

impl fmt::Display for OverrideSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ForceDLAA: {}", self.force_dlaa)?;
        writeln!(f, "OverrideAutoExposure: {}", self.auto_exposure.as_raw())?;
        writeln!(f, "OverrideDlssHud: {}", self.dlss_hud.as_raw())?;
        writeln!(f, "OverrideAppId: {}", self.override_app_id)?;
        writeln!(f, "QualityLevels: {}", self.override_quality_levels)?;
        if self.override_quality_levels {
            for tier in PerfQuality::ALL {
                writeln!(f, "  {:?}: {}", tier, self.ratios.get(tier))?;
            }
        }
        for tier in PresetTier::ALL {
            writeln!(f, "Preset {}: {:?}", tier.label(), self.preset(tier))?;
        }
        write!(f, "Layout: {}", self.layout)
    }
}

/// Holder of the current settings snapshot
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<OverrideSettings>>,
}

impl PolicyStore {
    pub fn new(settings: OverrideSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// The settings in effect right now
    pub fn snapshot(&self) -> Arc<OverrideSettings> {
        Arc::clone(&self.current.read())
    }

    /// Publish a new snapshot; calls already in flight keep the old one
    pub fn replace(&self, settings: OverrideSettings) {
        *self.current.write() = Arc::new(settings);
    }
}

/// Most recent `PerfQualityValue` seen through the signed setter
///
/// Process-wide rather than per parameter object: the runtime sets the tier
/// and then queries the recommended size on the same object, and nothing in
/// the traffic links the two calls otherwise. Starts at `MaxPerf`.
#[derive(Debug, Default)]
pub struct QualityTierCell(AtomicI32);

impl QualityTierCell {
    pub fn record(&self, raw: i32) {
        self.0.store(raw, Ordering::Relaxed);
    }

    pub fn raw(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }

    /// The recorded tier, or `None` if the raw value is out of range
    pub fn tier(&self) -> Option<PerfQuality> {
        PerfQuality::from_raw(self.raw())
    }
}
