//! Config file change watcher
//!
//! Polls the config file's directory on a background thread and reports
//! modifications of files whose name matches the config file name
//! (ASCII case-insensitive). Stopping is explicit: [`ConfigWatcher::stop`]
//! or drop signals the thread over a channel and joins it.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// Errors starting a watcher
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Config path {0:?} has no file name or parent directory")]
    InvalidPath(PathBuf),

    #[error("Failed to list {dir:?}: {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Kind of change between two directory listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEvent {
    pub kind: ChangeKind,
    pub name: OsString,
}

/// File name to modification time
type Listing = HashMap<OsString, SystemTime>;

fn list_dir(dir: &Path) -> std::io::Result<Listing> {
    let mut listing = Listing::new();
    // Entries can vanish between listing and stat; skip them
    for entry in std::fs::read_dir(dir)?.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if let (true, Ok(modified)) = (metadata.is_file(), metadata.modified()) {
            listing.insert(entry.file_name(), modified);
        }
    }
    Ok(listing)
}

/// Changes from `old` to `new`
pub fn diff_listings(old: &Listing, new: &Listing) -> Vec<DirEvent> {
    let mut events = Vec::new();

    for (name, modified) in new {
        match old.get(name) {
            None => events.push(DirEvent {
                kind: ChangeKind::Added,
                name: name.clone(),
            }),
            Some(previous) if previous != modified => events.push(DirEvent {
                kind: ChangeKind::Modified,
                name: name.clone(),
            }),
            Some(_) => {}
        }
    }

    for name in old.keys().filter(|name| !new.contains_key(*name)) {
        events.push(DirEvent {
            kind: ChangeKind::Removed,
            name: name.clone(),
        });
    }

    events
}

/// Whether `event` is a modification of `file_name`
pub fn is_config_modified(event: &DirEvent, file_name: &str) -> bool {
    event.kind == ChangeKind::Modified
        && event
            .name
            .to_str()
            .is_some_and(|name| name.eq_ignore_ascii_case(file_name))
}

/// Background watcher for one config file
pub struct ConfigWatcher {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching `path`, calling `on_change` after each modification
    ///
    /// Fails if the directory cannot be listed, in which case hot reload
    /// should be treated as disabled.
    pub fn spawn<F>(path: &Path, interval: Duration, on_change: F) -> Result<Self, WatchError>
    where
        F: Fn() + Send + 'static,
    {
        let invalid = || WatchError::InvalidPath(path.to_path_buf());
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(invalid)?
            .to_string();
        let dir = match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => return Err(invalid()),
        };

        let mut listing = list_dir(&dir).map_err(|source| WatchError::Io {
            dir: dir.clone(),
            source,
        })?;

        let (stop, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("ngxtweaks-config-watch".into())
            .spawn(move || {
                tracing::debug!("Watching {:?} for changes to {}", dir, file_name);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let current = match list_dir(&dir) {
                        Ok(current) => current,
                        Err(e) => {
                            tracing::warn!("Failed to list {:?}: {}", dir, e);
                            continue;
                        }
                    };

                    let changed = diff_listings(&listing, &current)
                        .iter()
                        .any(|event| is_config_modified(event, &file_name));
                    listing = current;

                    if changed {
                        tracing::info!("{} changed, reloading", file_name);
                        on_change();
                    }
                }
                tracing::debug!("Config watcher stopped");
            })
            .map_err(|source| WatchError::Io {
                dir: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the thread to exit without waiting for it
    ///
    /// For contexts where joining could block, such as module unload.
    pub fn signal_stop(&self) {
        let _ = self.stop.try_send(());
    }

    /// Stop the thread and wait for it
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
