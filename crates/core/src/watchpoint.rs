//! Module-load watchpoint
//!
//! Intercepts the dynamic-library load primitive so target discovery runs
//! after every load. Once both target modules have been attempted the
//! watchpoint removes itself.

use ngxtweaks_engine::{ExportError, ExportResolver};
use ngxtweaks_sdk::modules::{LOAD_LIBRARY_EXPORT, LOAD_LIBRARY_MODULE};

use crate::context::{HookSlot, TweakContext};
use crate::hooks::HookError;

/// Watchpoint installation errors
#[derive(Debug, thiserror::Error)]
pub enum WatchpointError {
    #[error(transparent)]
    Exports(#[from] ExportError),

    #[error("Failed to intercept LoadLibraryExW: {0}")]
    Intercept(#[from] HookError),
}

impl TweakContext {
    /// Start watching module loads, then check modules already resident
    ///
    /// Does nothing if the watchpoint is already active or both targets
    /// were already handled.
    pub fn install_watchpoint(&self) -> Result<(), WatchpointError> {
        {
            let mut state = self.discovery.lock();
            let done = state.loader.attempted && state.engine.attempted;
            if state.watchpoint.is_some() || done {
                return Ok(());
            }

            let resolver = ExportResolver::open(&*self.modules, LOAD_LIBRARY_MODULE)?;
            let target = resolver.get(LOAD_LIBRARY_EXPORT)?;

            let (key, original) = unsafe {
                self.primitive.create(
                    LOAD_LIBRARY_EXPORT,
                    target.as_ptr() as *const (),
                    self.detours().get(HookSlot::LoadLibrary),
                )
            }?;
            self.originals().store(HookSlot::LoadLibrary, original);

            if let Err(e) = self.primitive.enable(key) {
                self.discard(&[key]);
                return Err(e.into());
            }
            state.watchpoint = Some(key);
            tracing::debug!("Watching {} for target modules", LOAD_LIBRARY_EXPORT);
        }

        // The host may have loaded either target before we got here
        self.on_library_loaded();
        Ok(())
    }

    /// Run discovery after a load; retire the watchpoint when done
    pub fn on_library_loaded(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.discover_loader();
        self.discover_engine();

        let mut state = self.discovery.lock();
        if !(state.loader.attempted && state.engine.attempted) {
            return;
        }
        if let Some(key) = state.watchpoint.take() {
            match self.primitive.remove(key) {
                Ok(()) => tracing::debug!("Target modules handled, watchpoint removed"),
                Err(e) => tracing::warn!("Failed to remove watchpoint: {}", e),
            }
        }
    }

    pub fn watchpoint_active(&self) -> bool {
        self.discovery.lock().watchpoint.is_some()
    }
}
