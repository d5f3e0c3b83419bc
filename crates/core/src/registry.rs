//! On-screen indicator override
//!
//! The engine module decides whether to draw its indicator by querying a
//! registry value. The intercepted query runs the real one first, then the
//! result is adjusted here for that single value name.

use ngxtweaks_sdk::modules::{INDICATOR_FORCE_ON, INDICATOR_VALUE_NAME, REGISTRY_SUCCESS};

use crate::policy::Override;

/// Longest value name scanned for a terminator before giving up
const MAX_VALUE_NAME: usize = 256;

/// Whether a UTF-16 value name is the indicator value (case-insensitive)
pub fn is_indicator_value(name: &[u16]) -> bool {
    let expected = INDICATOR_VALUE_NAME.encode_utf16();
    name.len() == INDICATOR_VALUE_NAME.len()
        && name.iter().zip(expected).all(|(&actual, expected)| {
            match (u8::try_from(actual), u8::try_from(expected)) {
                (Ok(a), Ok(e)) => a.eq_ignore_ascii_case(&e),
                _ => actual == expected,
            }
        })
}

/// Status to hand back for a completed query, rewriting `data` if needed
///
/// `data` is the caller's buffer when it holds at least four bytes. Force
/// on stores the enable value and reports success even if the value does
/// not exist; force off stores zero and keeps the real status.
pub fn override_indicator(hud: Override, name: &[u16], data: Option<&mut [u8]>, status: i32) -> i32 {
    if hud == Override::Default || !is_indicator_value(name) {
        return status;
    }
    let Some(data) = data.filter(|data| data.len() >= 4) else {
        return status;
    };

    match hud {
        Override::ForceOn => {
            data[..4].copy_from_slice(&INDICATOR_FORCE_ON.to_le_bytes());
            REGISTRY_SUCCESS
        }
        Override::ForceOff => {
            data[..4].copy_from_slice(&0u32.to_le_bytes());
            status
        }
        Override::Default => status,
    }
}

/// A NUL-terminated UTF-16 string, if terminated within [`MAX_VALUE_NAME`]
///
/// # Safety
/// `ptr` must be null or readable up to its terminator or the scan limit.
unsafe fn wide_str<'a>(ptr: *const u16) -> Option<&'a [u16]> {
    if ptr.is_null() {
        return None;
    }
    let len = (0..MAX_VALUE_NAME).find(|&i| *ptr.add(i) == 0)?;
    Some(std::slice::from_raw_parts(ptr, len))
}

/// [`override_indicator`] over the raw query arguments
///
/// # Safety
/// Arguments must be those of a completed `RegQueryValueExW` call.
pub unsafe fn apply_indicator_override(
    hud: Override,
    value_name: *const u16,
    data: *mut u8,
    data_len: *const u32,
    status: i32,
) -> i32 {
    if hud == Override::Default {
        return status;
    }
    let Some(name) = wide_str(value_name) else {
        return status;
    };

    let buffer = if data.is_null() || data_len.is_null() || *data_len < 4 {
        None
    } else {
        Some(std::slice::from_raw_parts_mut(data, 4))
    };

    let result = override_indicator(hud, name, buffer, status);
    if result != status || hud == Override::ForceOff {
        tracing::debug!("Indicator query rewritten ({:?}, status {})", hud, status);
    }
    result
}
