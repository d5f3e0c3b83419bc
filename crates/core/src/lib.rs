//! ngxtweaks Core - Interception and Override Logic
//!
//! This crate contains everything between the host process and the NGX
//! runtime: watching module loads, intercepting the runtime's entry points
//! and parameter objects, and rewriting the traffic according to the
//! configured overrides.
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and engine crates for convenience:
//! - [`sdk`] - NGX ABI types, keys and entry point names
//! - [`engine`] - Resident-module lookup and export resolution

use tracing::info;

pub use ngxtweaks_engine as engine;
pub use ngxtweaks_sdk as sdk;

pub mod config;
pub mod context;
pub mod detours;
pub mod discovery;
pub mod dispatch;
pub mod hooks;
pub mod policy;
pub mod registry;
pub mod watchpoint;

pub use config::{ConfigError, ConfigResult, ConfigWatcher, WatchError};
pub use context::{context, install_context, HookSlot, TargetStatus, TweakContext};
pub use discovery::{Discovery, DiscoveryError};
pub use dispatch::{DispatchError, DispatchLayout, LayoutCatalog, LayoutError};
pub use hooks::{HookError, HookKey, HookManager, InterceptPrimitive};
pub use policy::{Override, OverrideSettings, PolicyStore, PresetTier};
pub use watchpoint::WatchpointError;

/// Errors starting interception
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Interception already started")]
    AlreadyStarted,

    #[error(transparent)]
    Watchpoint(#[from] WatchpointError),
}

/// Publish the process-wide context and start watching module loads
///
/// Modules the host already loaded are handled before this returns.
pub fn start(
    settings: OverrideSettings,
    layouts: LayoutCatalog,
) -> Result<&'static TweakContext, StartError> {
    let context = TweakContext::new(
        settings,
        HookManager,
        engine::SystemModules,
        detours::live_detours(),
    )
    .with_layouts(layouts);

    let context = install_context(context).ok_or(StartError::AlreadyStarted)?;
    context.install_watchpoint()?;

    info!("ngxtweaks started, waiting for {}", sdk::modules::LOADER_MODULE);
    Ok(context)
}

/// Shutdown the layer
///
/// No new intercepts are installed afterwards. Existing ones stay in place:
/// code in the host may still be running through them, and the modules they
/// patch are unloaded with the process.
pub fn shutdown() {
    let Some(context) = context() else {
        return;
    };
    if context.begin_shutdown() {
        info!("ngxtweaks shutting down...");
    }
}
