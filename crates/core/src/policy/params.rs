//! Parameter traffic rewrites
//!
//! Pure functions over a settings snapshot. The interceptors decode the raw
//! arguments, call these, and forward the result to the original function.

use std::ffi::CStr;

use ngxtweaks_sdk::{
    feature_flags, name_matches, RenderPreset, FEATURE_CREATE_FLAGS, HEIGHT, NGX_RESULT_SUCCESS,
    OUT_HEIGHT, OUT_WIDTH, PERF_QUALITY_VALUE, WIDTH,
};

use super::{Override, OverrideSettings, PresetTier, QualityTierCell};

/// Value to forward for a signed-integer set of `name`
///
/// Applies the auto-exposure override to feature creation flags and records
/// the selected quality tier.
pub fn rewrite_set_i(
    settings: &OverrideSettings,
    tier: &QualityTierCell,
    name: &CStr,
    value: i32,
) -> i32 {
    if name_matches(name, PERF_QUALITY_VALUE) {
        tier.record(value);
        return value;
    }

    if !name_matches(name, FEATURE_CREATE_FLAGS) {
        return value;
    }

    match settings.auto_exposure {
        Override::Default => value,
        Override::ForceOn => value | feature_flags::AUTO_EXPOSURE,
        Override::ForceOff => value & !feature_flags::AUTO_EXPOSURE,
    }
}

/// Preset hints to write after a forwarded unsigned-integer set, in tier
/// order, skipping tiers left at [`RenderPreset::Default`]
pub fn preset_injections(
    settings: &OverrideSettings,
) -> impl Iterator<Item = (&'static CStr, u32)> + '_ {
    PresetTier::ALL.into_iter().filter_map(|tier| {
        let preset = settings.preset(tier);
        (preset != RenderPreset::Default).then(|| (tier.hint_key(), preset.value()))
    })
}

/// Which full-resolution key a recommended-size key derives from
fn full_resolution_key(name: &CStr) -> Option<&'static CStr> {
    if name_matches(name, OUT_WIDTH) {
        Some(WIDTH)
    } else if name_matches(name, OUT_HEIGHT) {
        Some(HEIGHT)
    } else {
        None
    }
}

/// Adjust a value just returned by the unsigned-integer getter
///
/// `query` re-issues the getter for another key on the same object, writing
/// into the given slot (left untouched if the runtime fails the call).
///
/// Only successful `OutWidth`/`OutHeight` reads are touched: the quality
/// ratio of the last recorded tier is applied first, then full resolution
/// is forced if enabled and the value is still non-zero.
pub fn rewrite_get_ui(
    settings: &OverrideSettings,
    tier: &QualityTierCell,
    name: &CStr,
    result: u32,
    out: &mut u32,
    mut query: impl FnMut(&'static CStr, &mut u32),
) {
    if result != NGX_RESULT_SUCCESS {
        return;
    }
    let Some(full_key) = full_resolution_key(name) else {
        return;
    };

    if settings.override_quality_levels {
        match tier.tier() {
            Some(tier) => {
                let mut full = 0;
                query(full_key, &mut full);
                *out = (full as f32 * settings.ratios.get(tier)).round() as u32;
            }
            None => tracing::debug!(
                "Quality tier {} out of range, leaving {:?} unchanged",
                tier.raw(),
                name
            ),
        }
    }

    if settings.force_dlaa && *out != 0 {
        query(full_key, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngxtweaks_sdk::{PerfQuality, NGX_RESULT_FAIL};

    const FULL_WIDTH: u32 = 3840;
    const FULL_HEIGHT: u32 = 2160;

    fn full_resolution(key: &'static CStr, out: &mut u32) {
        *out = if key == WIDTH { FULL_WIDTH } else { FULL_HEIGHT };
    }

    #[test]
    fn test_auto_exposure_override_on_flags() {
        let tier = QualityTierCell::default();
        let mut settings = OverrideSettings::default();

        assert_eq!(rewrite_set_i(&settings, &tier, FEATURE_CREATE_FLAGS, 0x21), 0x21);

        settings.auto_exposure = Override::ForceOn;
        assert_eq!(rewrite_set_i(&settings, &tier, FEATURE_CREATE_FLAGS, 0x21), 0x61);
        assert_eq!(rewrite_set_i(&settings, &tier, c"dlss.feature.create.flags", 0), 0x40);

        settings.auto_exposure = Override::ForceOff;
        assert_eq!(rewrite_set_i(&settings, &tier, FEATURE_CREATE_FLAGS, 0x61), 0x21);
        assert_eq!(rewrite_set_i(&settings, &tier, FEATURE_CREATE_FLAGS, 0x21), 0x21);
    }

    #[test]
    fn test_other_keys_pass_through() {
        let tier = QualityTierCell::default();
        let settings = OverrideSettings {
            auto_exposure: Override::ForceOn,
            ..OverrideSettings::default()
        };
        assert_eq!(rewrite_set_i(&settings, &tier, c"DLSS.Feature.Create.Other", 5), 5);
    }

    #[test]
    fn test_perf_quality_is_recorded_and_forwarded() {
        let tier = QualityTierCell::default();
        let settings = OverrideSettings::default();

        assert_eq!(rewrite_set_i(&settings, &tier, PERF_QUALITY_VALUE, 2), 2);
        assert_eq!(tier.tier(), Some(PerfQuality::MaxQuality));

        assert_eq!(rewrite_set_i(&settings, &tier, c"perfqualityvalue", 3), 3);
        assert_eq!(tier.tier(), Some(PerfQuality::UltraPerformance));
    }

    #[test]
    fn test_presets_injected_in_tier_order() {
        let mut settings = OverrideSettings::default();
        assert_eq!(preset_injections(&settings).count(), 0);

        settings.presets[PresetTier::Performance.index()] = RenderPreset::D;
        settings.presets[PresetTier::Dlaa.index()] = RenderPreset::F;

        let injected: Vec<_> = preset_injections(&settings).collect();
        assert_eq!(
            injected,
            vec![
                (c"DLSS.Hint.Render.Preset.DLAA", 6),
                (c"DLSS.Hint.Render.Preset.Performance", 4),
            ]
        );
    }

    #[test]
    fn test_ratio_applied_for_recorded_tier() {
        let tier = QualityTierCell::default();
        let settings = OverrideSettings {
            override_quality_levels: true,
            ..OverrideSettings::default()
        };

        for quality in PerfQuality::ALL {
            tier.record(quality as i32);
            let mut out = 1234;
            rewrite_get_ui(&settings, &tier, OUT_WIDTH, NGX_RESULT_SUCCESS, &mut out, full_resolution);
            let expected = (FULL_WIDTH as f32 * settings.ratios.get(quality)).round() as u32;
            assert_eq!(out, expected, "{quality:?}");
        }

        tier.record(PerfQuality::Balanced as i32);
        let mut out = 0;
        rewrite_get_ui(&settings, &tier, c"outheight", NGX_RESULT_SUCCESS, &mut out, full_resolution);
        assert_eq!(out, 1253);
    }

    #[test]
    fn test_force_native_after_ratio() {
        let tier = QualityTierCell::default();
        tier.record(PerfQuality::UltraPerformance as i32);
        let settings = OverrideSettings {
            override_quality_levels: true,
            force_dlaa: true,
            ..OverrideSettings::default()
        };

        let mut out = 640;
        rewrite_get_ui(&settings, &tier, OUT_HEIGHT, NGX_RESULT_SUCCESS, &mut out, full_resolution);
        assert_eq!(out, FULL_HEIGHT);
    }

    #[test]
    fn test_force_native_keeps_zero() {
        let tier = QualityTierCell::default();
        let settings = OverrideSettings {
            force_dlaa: true,
            ..OverrideSettings::default()
        };

        let mut out = 0;
        let mut queried = false;
        rewrite_get_ui(&settings, &tier, OUT_WIDTH, NGX_RESULT_SUCCESS, &mut out, |_, _| {
            queried = true
        });
        assert_eq!(out, 0);
        assert!(!queried);
    }

    #[test]
    fn test_failed_or_unrelated_reads_untouched() {
        let tier = QualityTierCell::default();
        let settings = OverrideSettings {
            override_quality_levels: true,
            force_dlaa: true,
            ..OverrideSettings::default()
        };

        let mut out = 77;
        rewrite_get_ui(&settings, &tier, OUT_WIDTH, NGX_RESULT_FAIL, &mut out, full_resolution);
        assert_eq!(out, 77);

        rewrite_get_ui(&settings, &tier, WIDTH, NGX_RESULT_SUCCESS, &mut out, full_resolution);
        assert_eq!(out, 77);
    }

    #[test]
    fn test_out_of_range_tier_skips_ratio() {
        let tier = QualityTierCell::default();
        tier.record(42);
        let settings = OverrideSettings {
            override_quality_levels: true,
            ..OverrideSettings::default()
        };

        let mut out = 1920;
        rewrite_get_ui(&settings, &tier, OUT_WIDTH, NGX_RESULT_SUCCESS, &mut out, full_resolution);
        assert_eq!(out, 1920);
    }
}
