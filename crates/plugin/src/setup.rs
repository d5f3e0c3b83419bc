//! One-time setup, run on its own thread after attach

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ngxtweaks_core::config::{self, layouts_path, ConfigWatcher};
use ngxtweaks_core::{context, ConfigError, LayoutCatalog, OverrideSettings, StartError};

/// How often the config directory is polled for changes
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

static WATCHER: Mutex<Option<ConfigWatcher>> = Mutex::new(None);

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("No config location: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Start(#[from] StartError),
}

/// Settings from `path`, or defaults if the file can't be used
fn load_settings(path: &Path) -> (OverrideSettings, Option<ConfigError>) {
    let defaults = OverrideSettings::default();
    match config::load_settings(path, &defaults) {
        Ok(settings) => (settings, None),
        Err(e) => (defaults, Some(e)),
    }
}

/// Layout catalog from the optional layouts file
fn load_layouts(path: Option<PathBuf>) -> LayoutCatalog {
    let Some(path) = path.filter(|path| path.exists()) else {
        return LayoutCatalog::builtin();
    };

    match LayoutCatalog::load_from_file(&path) {
        Ok(catalog) => {
            tracing::info!("Loaded dispatch layouts from {:?}", path);
            catalog
        }
        Err(e) => {
            tracing::warn!("Ignoring {:?}: {}", path, e);
            LayoutCatalog::builtin()
        }
    }
}

fn start_watcher(path: PathBuf) {
    let watched = path.clone();
    let result = ConfigWatcher::spawn(&watched, WATCH_INTERVAL, move || {
        let Some(ctx) = context() else {
            return;
        };
        if let Err(e) = ctx.reload_settings(&path) {
            tracing::warn!("Keeping previous settings: {}", e);
        }
    });

    match result {
        Ok(watcher) => *WATCHER.lock() = Some(watcher),
        Err(e) => tracing::warn!("Config hot reload disabled: {}", e),
    }
}

/// Load config, start logging, and start interception
pub fn run() -> Result<(), SetupError> {
    let config_path = config::config_path()?;
    let (settings, load_error) = load_settings(&config_path);

    crate::logging::init(config::log_path().ok().as_deref(), settings.debug_log);
    tracing::info!(
        "ngxtweaks {} attached to {:?}",
        env!("CARGO_PKG_VERSION"),
        std::env::current_exe().ok()
    );
    if let Some(e) = load_error {
        tracing::error!("Failed to load {:?}, using defaults: {}", config_path, e);
    }

    let watch = settings.watch_config;
    let layouts = load_layouts(layouts_path().ok());
    ngxtweaks_core::start(settings, layouts)?;

    if watch {
        start_watcher(config_path);
    }
    Ok(())
}

/// Ask the watcher to exit without waiting for it
///
/// Safe under the loader lock: nothing is joined.
pub fn stop_watcher() {
    if let Some(watcher) = WATCHER.lock().as_ref() {
        watcher.signal_stop();
    }
}
