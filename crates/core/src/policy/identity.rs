//! Application identity override
//!
//! Some applications ship with an identity the runtime has a profile for,
//! and that profile can pin presets or block settings. Initializing under a
//! generic identity sidesteps it.

use std::ffi::{c_char, CStr};

use super::OverrideSettings;

/// Generic numeric application id
pub const GENERIC_APP_ID: u64 = 0x2448_0451;

/// Generic project id, used by the project-id initializers
pub const GENERIC_PROJECT_ID: &CStr = c"24480451-f00d-face-1304-0308dabad187";

/// Application id to forward to a numeric-id initializer
pub fn effective_app_id(settings: &OverrideSettings, app_id: u64) -> u64 {
    if settings.override_app_id {
        GENERIC_APP_ID
    } else {
        app_id
    }
}

/// Project id to forward to a project-id initializer
pub fn effective_project_id(settings: &OverrideSettings, project_id: *const c_char) -> *const c_char {
    if settings.override_app_id {
        GENERIC_PROJECT_ID.as_ptr()
    } else {
        project_id
    }
}
