//! Config path resolution
//!
//! Every file the layer reads or writes sits next to the host executable.

use std::path::PathBuf;

use super::{ConfigError, ConfigResult};

/// Settings file name, also what the watcher filters on
pub const CONFIG_FILE_NAME: &str = "ngxtweaks.toml";

const LOG_FILE_NAME: &str = "ngxtweaks.log";

const LAYOUTS_FILE_NAME: &str = "ngxtweaks_layouts.json";

/// Directory containing the host executable
pub fn host_dir() -> ConfigResult<PathBuf> {
    let exe = std::env::current_exe().map_err(ConfigError::IoError)?;
    exe.parent()
        .map(PathBuf::from)
        .ok_or(ConfigError::NoConfigDirectory)
}

/// Path: `<host dir>/ngxtweaks.toml`
pub fn config_path() -> ConfigResult<PathBuf> {
    Ok(host_dir()?.join(CONFIG_FILE_NAME))
}

/// Path: `<host dir>/ngxtweaks.log`
pub fn log_path() -> ConfigResult<PathBuf> {
    Ok(host_dir()?.join(LOG_FILE_NAME))
}

/// Path: `<host dir>/ngxtweaks_layouts.json` (optional file)
pub fn layouts_path() -> ConfigResult<PathBuf> {
    Ok(host_dir()?.join(LAYOUTS_FILE_NAME))
}
