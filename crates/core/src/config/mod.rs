//! Configuration for ngxtweaks
//!
//! Settings live in `ngxtweaks.toml` next to the host executable:
//!
//! ```toml
//! [dlss]
//! debug_log = true
//! watch_config = false
//! force_dlaa = false
//! override_auto_exposure = 0   # 0 = default, 1 = force on, -1 = force off
//! override_dlss_hud = 0        # 0 = default, 1 = force on, -1 = force off
//! override_app_id = false
//!
//! [quality_levels]
//! enable = false
//! performance = 0.5
//! balanced = 0.58
//! quality = 0.66666667
//! ultra_performance = 0.33333334
//! ultra_quality = 0.77
//!
//! [presets]             # "Default" or A..F
//! dlaa = "Default"
//! quality = "Default"
//! balanced = "Default"
//! performance = "Default"
//! ultra_performance = "Default"
//!
//! [layout]
//! name = "default"
//! ```
//!
//! Reading is lenient: a key that is missing or unparsable keeps its
//! previous value (presets fall back to `Default`), so a reload with a typo
//! changes nothing else. Only a syntactically broken file fails the load.

mod loader;
pub mod watcher;

use serde::Serialize;
use std::path::Path;
use toml::{Table, Value};

use ngxtweaks_sdk::{PerfQuality, RenderPreset};

use crate::policy::{Override, OverrideSettings, PresetTier};

pub use loader::{config_path, host_dir, layouts_path, log_path, CONFIG_FILE_NAME};
pub use watcher::{ConfigWatcher, WatchError};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Could not determine the directory of the host executable
    #[error("Config directory not available - could not resolve host executable path")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// On-disk shape, used when writing a default file
#[derive(Debug, Serialize)]
struct ConfigFile {
    dlss: DlssSection,
    quality_levels: QualityLevelsSection,
    presets: PresetsSection,
    layout: LayoutSection,
}

#[derive(Debug, Serialize)]
struct DlssSection {
    debug_log: bool,
    watch_config: bool,
    force_dlaa: bool,
    override_auto_exposure: i64,
    override_dlss_hud: i64,
    override_app_id: bool,
}

#[derive(Debug, Serialize)]
struct QualityLevelsSection {
    enable: bool,
    performance: f32,
    balanced: f32,
    quality: f32,
    ultra_performance: f32,
    ultra_quality: f32,
}

#[derive(Debug, Serialize)]
struct PresetsSection {
    dlaa: String,
    quality: String,
    balanced: String,
    performance: String,
    ultra_performance: String,
}

#[derive(Debug, Serialize)]
struct LayoutSection {
    name: String,
}

impl From<&OverrideSettings> for ConfigFile {
    fn from(settings: &OverrideSettings) -> Self {
        let preset = |tier: PresetTier| format!("{:?}", settings.preset(tier));
        Self {
            dlss: DlssSection {
                debug_log: settings.debug_log,
                watch_config: settings.watch_config,
                force_dlaa: settings.force_dlaa,
                override_auto_exposure: settings.auto_exposure.as_raw(),
                override_dlss_hud: settings.dlss_hud.as_raw(),
                override_app_id: settings.override_app_id,
            },
            quality_levels: QualityLevelsSection {
                enable: settings.override_quality_levels,
                performance: settings.ratios.get(PerfQuality::MaxPerf),
                balanced: settings.ratios.get(PerfQuality::Balanced),
                quality: settings.ratios.get(PerfQuality::MaxQuality),
                ultra_performance: settings.ratios.get(PerfQuality::UltraPerformance),
                ultra_quality: settings.ratios.get(PerfQuality::UltraQuality),
            },
            presets: PresetsSection {
                dlaa: preset(PresetTier::Dlaa),
                quality: preset(PresetTier::Quality),
                balanced: preset(PresetTier::Balanced),
                performance: preset(PresetTier::Performance),
                ultra_performance: preset(PresetTier::UltraPerformance),
            },
            layout: LayoutSection {
                name: settings.layout.clone(),
            },
        }
    }
}

/// Ratio keys of `[quality_levels]`, by tier
const RATIO_KEYS: [(&str, PerfQuality); 5] = [
    ("performance", PerfQuality::MaxPerf),
    ("balanced", PerfQuality::Balanced),
    ("quality", PerfQuality::MaxQuality),
    ("ultra_performance", PerfQuality::UltraPerformance),
    ("ultra_quality", PerfQuality::UltraQuality),
];

/// Preset keys of `[presets]`, by tier
const PRESET_KEYS: [(&str, PresetTier); 5] = [
    ("dlaa", PresetTier::Dlaa),
    ("quality", PresetTier::Quality),
    ("balanced", PresetTier::Balanced),
    ("performance", PresetTier::Performance),
    ("ultra_performance", PresetTier::UltraPerformance),
];

fn section<'a>(root: &'a Table, name: &str) -> Option<&'a Table> {
    match root.get(name) {
        Some(Value::Table(table)) => Some(table),
        Some(_) => {
            tracing::warn!("[{}] is not a table, ignoring it", name);
            None
        }
        None => None,
    }
}

fn read_bool(table: Option<&Table>, key: &str, current: bool) -> bool {
    match table.and_then(|t| t.get(key)) {
        None => current,
        Some(Value::Boolean(value)) => *value,
        Some(Value::Integer(value)) => *value != 0,
        Some(Value::String(value)) => {
            let value = value.trim();
            ["true", "yes", "1"]
                .iter()
                .any(|accepted| value.eq_ignore_ascii_case(accepted))
        }
        Some(other) => {
            tracing::warn!("{} = {} is not a boolean, keeping {}", key, other, current);
            current
        }
    }
}

fn read_override(table: Option<&Table>, key: &str, current: Override) -> Override {
    match table.and_then(|t| t.get(key)) {
        None => current,
        Some(Value::Integer(value)) => Override::from_raw(*value),
        Some(Value::String(value)) => match value.trim().parse::<i64>() {
            Ok(value) => Override::from_raw(value),
            Err(_) => {
                tracing::warn!("{} = {:?} is not an integer, keeping {:?}", key, value, current);
                current
            }
        },
        Some(other) => {
            tracing::warn!("{} = {} is not an integer, keeping {:?}", key, other, current);
            current
        }
    }
}

fn read_ratio(table: Option<&Table>, key: &str, current: f32) -> f32 {
    let parsed = match table.and_then(|t| t.get(key)) {
        None => return current,
        Some(Value::Float(value)) => Some(*value as f32),
        Some(Value::Integer(value)) => Some(*value as f32),
        Some(Value::String(value)) => value.trim().parse::<f32>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(ratio) if ratio.is_finite() && ratio >= 0.0 => ratio,
        _ => {
            tracing::warn!("{} is not a valid ratio, keeping {}", key, current);
            current
        }
    }
}

fn read_preset(table: Option<&Table>, key: &str) -> RenderPreset {
    match table.and_then(|t| t.get(key)) {
        None => RenderPreset::Default,
        Some(Value::String(value)) => RenderPreset::from_name(value).unwrap_or_else(|| {
            tracing::warn!("Unknown preset {} = {:?}, using Default", key, value);
            RenderPreset::Default
        }),
        Some(other) => {
            tracing::warn!("Preset {} = {} is not a string, using Default", key, other);
            RenderPreset::Default
        }
    }
}

/// Parse settings from TOML text, starting from `previous`
pub fn parse_settings(text: &str, previous: &OverrideSettings) -> ConfigResult<OverrideSettings> {
    let root: Table = text.parse()?;

    let dlss = section(&root, "dlss");
    let levels = section(&root, "quality_levels");
    let presets = section(&root, "presets");
    let layout = section(&root, "layout");

    let mut settings = previous.clone();
    settings.debug_log = read_bool(dlss, "debug_log", previous.debug_log);
    settings.watch_config = read_bool(dlss, "watch_config", previous.watch_config);
    settings.force_dlaa = read_bool(dlss, "force_dlaa", previous.force_dlaa);
    settings.auto_exposure = read_override(dlss, "override_auto_exposure", previous.auto_exposure);
    settings.dlss_hud = read_override(dlss, "override_dlss_hud", previous.dlss_hud);
    settings.override_app_id = read_bool(dlss, "override_app_id", previous.override_app_id);

    settings.override_quality_levels =
        read_bool(levels, "enable", previous.override_quality_levels);
    if settings.override_quality_levels {
        for (key, tier) in RATIO_KEYS {
            let ratio = read_ratio(levels, key, previous.ratios.get(tier));
            settings.ratios.set(tier, ratio);
        }
    }

    for (key, tier) in PRESET_KEYS {
        settings.presets[tier.index()] = read_preset(presets, key);
    }

    if let Some(Value::String(name)) = layout.and_then(|t| t.get("name")) {
        settings.layout = name.trim().to_string();
    }

    Ok(settings)
}

/// Load settings from `path`, writing a default file first if none exists
pub fn load_settings(path: &Path, previous: &OverrideSettings) -> ConfigResult<OverrideSettings> {
    if !path.exists() {
        save_settings(path, previous)?;
        tracing::info!("Created default config at {:?}", path);
        return Ok(previous.clone());
    }

    let text = std::fs::read_to_string(path)?;
    let settings = parse_settings(&text, previous)?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(settings)
}

/// Write `settings` to `path`
pub fn save_settings(path: &Path, settings: &OverrideSettings) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(&ConfigFile::from(settings))?;
    std::fs::write(path, content)?;
    tracing::debug!("Saved config to {:?}", path);
    Ok(())
}
