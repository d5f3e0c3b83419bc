//! Process-wide interception state
//!
//! One [`TweakContext`] owns everything the intercepts share: the policy
//! store, the last observed quality tier, the original-function table, and
//! the once-only state of module discovery and parameter-table hooking.
//! Detours reach it through [`context`]; tests build their own instance
//! around fake primitives.

use parking_lot::Mutex;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use ngxtweaks_engine::ModuleSource;
use ngxtweaks_sdk::EntryPoint;

use crate::config::{self, ConfigResult};
use crate::dispatch::LayoutCatalog;
use crate::hooks::{HookKey, InterceptPrimitive};
use crate::policy::{OverrideSettings, PolicyStore, QualityTierCell};

/// Every function the layer may intercept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSlot {
    Entry(EntryPoint),
    SetI,
    SetUI,
    GetUI,
    LoadLibrary,
    RegistryQuery,
}

impl HookSlot {
    pub const COUNT: usize = EntryPoint::COUNT + 5;

    pub fn index(self) -> usize {
        match self {
            HookSlot::Entry(entry) => entry.index(),
            HookSlot::SetI => EntryPoint::COUNT,
            HookSlot::SetUI => EntryPoint::COUNT + 1,
            HookSlot::GetUI => EntryPoint::COUNT + 2,
            HookSlot::LoadLibrary => EntryPoint::COUNT + 3,
            HookSlot::RegistryQuery => EntryPoint::COUNT + 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if let Some(entry) = EntryPoint::ALL.get(index) {
            return Some(HookSlot::Entry(*entry));
        }
        let slot = match index - EntryPoint::COUNT {
            0 => HookSlot::SetI,
            1 => HookSlot::SetUI,
            2 => HookSlot::GetUI,
            3 => HookSlot::LoadLibrary,
            4 => HookSlot::RegistryQuery,
            _ => return None,
        };
        Some(slot)
    }

    pub fn name(self) -> &'static str {
        match self {
            HookSlot::Entry(entry) => entry.export_name(),
            HookSlot::SetI => "NVSDK_NGX_Parameter::SetI",
            HookSlot::SetUI => "NVSDK_NGX_Parameter::SetUI",
            HookSlot::GetUI => "NVSDK_NGX_Parameter::GetUI",
            HookSlot::LoadLibrary => ngxtweaks_sdk::modules::LOAD_LIBRARY_EXPORT,
            HookSlot::RegistryQuery => ngxtweaks_sdk::modules::REGISTRY_QUERY_EXPORT,
        }
    }
}

/// Original (pre-intercept) function per [`HookSlot`]
///
/// Written once per slot, before the intercept is enabled, and read on
/// every intercepted call.
pub struct OriginalTable {
    slots: [AtomicUsize; HookSlot::COUNT],
}

impl Default for OriginalTable {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicUsize::new(0)),
        }
    }
}

impl OriginalTable {
    pub fn store(&self, slot: HookSlot, original: *const ()) {
        self.slots[slot.index()].store(original as usize, Ordering::Release);
    }

    pub fn load(&self, slot: HookSlot) -> Option<NonNull<()>> {
        NonNull::new(self.slots[slot.index()].load(Ordering::Acquire) as *mut ())
    }

    /// The original as a typed function pointer
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the slot's signature.
    pub unsafe fn get<F: Copy>(&self, slot: HookSlot) -> Option<F> {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        let address = self.load(slot)?.as_ptr() as usize;
        Some(std::mem::transmute_copy::<usize, F>(&address))
    }
}

/// Replacement function per [`HookSlot`]
#[derive(Clone, Copy)]
pub struct DetourTable {
    slots: [*const (); HookSlot::COUNT],
}

// SAFETY: Only code addresses are stored, never dereferenced as data
unsafe impl Send for DetourTable {}
unsafe impl Sync for DetourTable {}

impl DetourTable {
    pub fn from_fn(mut detour: impl FnMut(HookSlot) -> *const ()) -> Self {
        Self {
            slots: std::array::from_fn(|index| {
                HookSlot::from_index(index).map_or(std::ptr::null(), &mut detour)
            }),
        }
    }

    pub fn get(&self, slot: HookSlot) -> *const () {
        self.slots[slot.index()]
    }
}

/// Discovery progress of one target module
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TargetStatus {
    /// The module was seen resident and interception was tried
    pub attempted: bool,
    /// Interception completed; never retried either way
    pub succeeded: bool,
}

#[derive(Default)]
pub(crate) struct DiscoveryState {
    pub loader: TargetStatus,
    pub engine: TargetStatus,
    /// Parameter-acquisition intercepts, disabled once the table is hooked
    pub acquire_hooks: Vec<HookKey>,
    pub watchpoint: Option<HookKey>,
}

#[derive(Default)]
pub(crate) struct ParamHookState {
    pub hooked: bool,
    pub keys: Vec<HookKey>,
}

/// Shared state of the interception layer
pub struct TweakContext {
    policy: PolicyStore,
    quality_tier: QualityTierCell,
    originals: OriginalTable,
    detours: DetourTable,
    layouts: LayoutCatalog,
    pub(crate) primitive: Box<dyn InterceptPrimitive>,
    pub(crate) modules: Box<dyn ModuleSource>,
    /// Serializes discovery of both target modules and the watchpoint
    pub(crate) discovery: Mutex<DiscoveryState>,
    /// Serializes parameter-table hooking; taken before `discovery`
    pub(crate) params: Mutex<ParamHookState>,
    /// Set once the host starts unloading the layer
    shutting_down: AtomicBool,
}

impl TweakContext {
    pub fn new(
        settings: OverrideSettings,
        primitive: impl InterceptPrimitive + 'static,
        modules: impl ModuleSource + 'static,
        detours: DetourTable,
    ) -> Self {
        Self {
            policy: PolicyStore::new(settings),
            quality_tier: QualityTierCell::default(),
            originals: OriginalTable::default(),
            detours,
            layouts: LayoutCatalog::builtin(),
            primitive: Box::new(primitive),
            modules: Box::new(modules),
            discovery: Mutex::new(DiscoveryState::default()),
            params: Mutex::new(ParamHookState::default()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Replace the layout catalog (built-in layout only by default)
    pub fn with_layouts(mut self, layouts: LayoutCatalog) -> Self {
        self.layouts = layouts;
        self
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    /// Current settings snapshot
    pub fn settings(&self) -> Arc<OverrideSettings> {
        self.policy.snapshot()
    }

    pub fn quality_tier(&self) -> &QualityTierCell {
        &self.quality_tier
    }

    pub fn originals(&self) -> &OriginalTable {
        &self.originals
    }

    pub fn detours(&self) -> &DetourTable {
        &self.detours
    }

    pub fn layouts(&self) -> &LayoutCatalog {
        &self.layouts
    }

    pub fn loader_status(&self) -> TargetStatus {
        self.discovery.lock().loader
    }

    pub fn engine_status(&self) -> TargetStatus {
        self.discovery.lock().engine
    }

    pub fn params_hooked(&self) -> bool {
        self.params.lock().hooked
    }

    /// Stop installing new intercepts; existing ones keep forwarding
    ///
    /// Returns false if shutdown had already begun.
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Re-read the config file over the current settings and publish them
    pub fn reload_settings(&self, path: &Path) -> ConfigResult<()> {
        let previous = self.settings();
        let settings = config::load_settings(path, &previous)?;
        if settings != *previous {
            tracing::info!("Settings reloaded:\n{}", settings);
        }
        self.policy.replace(settings);
        Ok(())
    }
}

static CONTEXT: OnceLock<TweakContext> = OnceLock::new();

/// Publish the process-wide context
///
/// Returns `None` if one was already installed; the given context is
/// dropped in that case.
pub fn install_context(context: TweakContext) -> Option<&'static TweakContext> {
    CONTEXT.set(context).ok()?;
    CONTEXT.get()
}

/// The process-wide context, if installed
pub fn context() -> Option<&'static TweakContext> {
    CONTEXT.get()
}
