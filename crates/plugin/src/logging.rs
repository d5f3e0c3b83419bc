//! Log output setup
//!
//! Logs go to `ngxtweaks.log` beside the host executable, falling back to
//! stdout when the file can't be created. `RUST_LOG` takes precedence over
//! the configured level.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Default filter directive for the `debug_log` setting
pub fn default_directive(debug_log: bool) -> &'static str {
    if debug_log {
        "debug"
    } else {
        "warn"
    }
}

fn filter(debug_log: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug_log)))
}

/// Install the global subscriber; later calls are ignored
pub fn init(log_path: Option<&Path>, debug_log: bool) {
    let file = log_path.and_then(|path| File::create(path).ok());

    let _ = match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter(debug_log))
            .with_ansi(false)
            .with_thread_ids(true)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter(debug_log))
            .try_init(),
    };
}
