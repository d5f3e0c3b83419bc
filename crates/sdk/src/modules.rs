//! Module and import names
//!
//! Names are compared case-insensitively by the loader, so are we.

/// Loader module: exports the NGX init and parameter entry points
pub const LOADER_MODULE: &str = "_nvngx.dll";

/// Engine module: the DLSS feature implementation
pub const ENGINE_MODULE: &str = "nvngx_dlss.dll";

/// Module providing the dynamic-library load primitive
pub const LOAD_LIBRARY_MODULE: &str = "kernel32.dll";

/// Dynamic-library load primitive watched for target modules
pub const LOAD_LIBRARY_EXPORT: &str = "LoadLibraryExW";

/// Module the engine imports its registry query from
pub const REGISTRY_MODULE: &str = "advapi32.dll";

/// Registry query imported by the engine module
pub const REGISTRY_QUERY_EXPORT: &str = "RegQueryValueExW";

/// Registry value consulted by the engine for its on-screen indicator
pub const INDICATOR_VALUE_NAME: &str = "ShowDlssIndicator";

/// Value written to force the indicator on
pub const INDICATOR_FORCE_ON: u32 = 0x400;

/// `ERROR_SUCCESS` status for registry calls
pub const REGISTRY_SUCCESS: i32 = 0;

/// `ERROR_FILE_NOT_FOUND` status for registry calls
pub const REGISTRY_NOT_FOUND: i32 = 2;
