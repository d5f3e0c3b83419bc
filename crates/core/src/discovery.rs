//! Target module discovery
//!
//! Each target module is handled at most once per process, the first time
//! it is seen resident:
//! - the loader module must export every entry point in
//!   [`EntryPoint::ALL`]; all of them are intercepted or none are
//! - the engine module gets its registry-query import redirected
//!
//! A failure is logged and never retried. The module then simply runs
//! without interception.

use ngxtweaks_engine::{resolve_all, ExportError, ExportResolver, ModuleHandle};
use ngxtweaks_sdk::modules::{ENGINE_MODULE, LOADER_MODULE, REGISTRY_MODULE, REGISTRY_QUERY_EXPORT};
use ngxtweaks_sdk::{EntryKind, EntryPoint};

use crate::context::{HookSlot, TweakContext};
use crate::hooks::{HookError, HookKey};

/// Target discovery errors
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Exports(#[from] ExportError),

    #[error("Failed to intercept {name}: {source}")]
    Intercept {
        name: &'static str,
        #[source]
        source: HookError,
    },
}

/// Outcome of one discovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// The module is not loaded yet
    NotResident,
    /// Handled earlier; nothing done
    AlreadyAttempted,
    /// Intercepts installed and enabled
    Installed,
    /// Tried and gave up for good
    Failed,
}

impl TweakContext {
    /// Intercept the loader module's entry points if it is resident
    pub fn discover_loader(&self) -> Discovery {
        let mut state = self.discovery.lock();
        if state.loader.attempted {
            return Discovery::AlreadyAttempted;
        }

        let resolver = match ExportResolver::open(&*self.modules, LOADER_MODULE) {
            Ok(resolver) => resolver,
            Err(_) => return Discovery::NotResident,
        };
        state.loader.attempted = true;

        match self.intercept_entry_points(&resolver) {
            Ok(installed) => {
                state.loader.succeeded = true;
                state.acquire_hooks = installed
                    .iter()
                    .filter(|(entry, _)| entry.kind() == EntryKind::AcquireParameters)
                    .map(|&(_, key)| key)
                    .collect();
                tracing::info!(
                    "Intercepted {} entry points of {}",
                    installed.len(),
                    LOADER_MODULE
                );
                Discovery::Installed
            }
            Err(e) => {
                tracing::error!("{} left unintercepted: {}", LOADER_MODULE, e);
                Discovery::Failed
            }
        }
    }

    /// Redirect the engine module's registry-query import if it is resident
    pub fn discover_engine(&self) -> Discovery {
        let mut state = self.discovery.lock();
        if state.engine.attempted {
            return Discovery::AlreadyAttempted;
        }

        let Some(engine) = self.modules.find_module(ENGINE_MODULE) else {
            return Discovery::NotResident;
        };
        state.engine.attempted = true;

        match self.intercept_registry_query(engine) {
            Ok(()) => {
                state.engine.succeeded = true;
                tracing::info!("Intercepted {} of {}", REGISTRY_QUERY_EXPORT, ENGINE_MODULE);
                Discovery::Installed
            }
            Err(e) => {
                tracing::error!("{} left unintercepted: {}", ENGINE_MODULE, e);
                Discovery::Failed
            }
        }
    }

    fn intercept_entry_points(
        &self,
        resolver: &ExportResolver<'_>,
    ) -> Result<Vec<(EntryPoint, HookKey)>, DiscoveryError> {
        let resolved = resolve_all(resolver, EntryPoint::ALL, EntryPoint::export_name)?;

        let mut installed = Vec::with_capacity(resolved.len());
        for (entry, address) in resolved {
            let slot = HookSlot::Entry(entry);
            let created = unsafe {
                self.primitive.create(
                    entry.export_name(),
                    address.as_ptr() as *const (),
                    self.detours().get(slot),
                )
            };

            match created {
                Ok((key, original)) => {
                    self.originals().store(slot, original);
                    installed.push((entry, key));
                }
                Err(source) => {
                    self.discard_entries(&installed);
                    return Err(DiscoveryError::Intercept {
                        name: entry.export_name(),
                        source,
                    });
                }
            }
        }

        for &(entry, key) in &installed {
            if let Err(source) = self.primitive.enable(key) {
                self.discard_entries(&installed);
                return Err(DiscoveryError::Intercept {
                    name: entry.export_name(),
                    source,
                });
            }
        }

        Ok(installed)
    }

    fn discard_entries(&self, installed: &[(EntryPoint, HookKey)]) {
        let keys: Vec<HookKey> = installed.iter().map(|&(_, key)| key).collect();
        self.discard(&keys);
    }

    fn intercept_registry_query(&self, engine: ModuleHandle) -> Result<(), DiscoveryError> {
        let registry = ExportResolver::open(&*self.modules, REGISTRY_MODULE)?;
        let target = registry.get(REGISTRY_QUERY_EXPORT)?;

        let intercept = |source| DiscoveryError::Intercept {
            name: REGISTRY_QUERY_EXPORT,
            source,
        };

        let (key, original) = unsafe {
            self.primitive.create_import(
                REGISTRY_QUERY_EXPORT,
                engine.as_ptr() as *const u8,
                REGISTRY_MODULE,
                target.as_ptr() as *const (),
                self.detours().get(HookSlot::RegistryQuery),
            )
        }
        .map_err(intercept)?;

        self.originals().store(HookSlot::RegistryQuery, original);

        if let Err(source) = self.primitive.enable(key) {
            self.discard(&[key]);
            return Err(intercept(source));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::testing::*;
    use crate::context::TargetStatus;
    use crate::policy::OverrideSettings;

    pub const LOADER_BASE: usize = 0x1_0000;
    pub const ENGINE_BASE: usize = 0x2_0000;
    pub const ADVAPI_BASE: usize = 0x3_0000;
    pub const REG_QUERY: usize = 0x3_0400;

    /// Every loader export, at `LOADER_BASE + 0x100 * (index + 1)`
    pub fn loader_exports() -> Vec<(&'static str, usize)> {
        EntryPoint::ALL
            .iter()
            .map(|entry| (entry.export_name(), LOADER_BASE + 0x100 * (entry.index() + 1)))
            .collect()
    }

    pub fn load_targets(modules: &FakeModules) {
        modules.load(LOADER_MODULE, LOADER_BASE, &loader_exports());
        modules.load(ENGINE_MODULE, ENGINE_BASE, &[]);
        modules.load(REGISTRY_MODULE, ADVAPI_BASE, &[(REGISTRY_QUERY_EXPORT, REG_QUERY)]);
    }

    #[test]
    fn test_not_resident_is_not_an_attempt() {
        let (context, calls, _) = context_with(OverrideSettings::default(), FakePrimitive::default());

        assert_eq!(context.discover_loader(), Discovery::NotResident);
        assert_eq!(context.discover_engine(), Discovery::NotResident);
        assert_eq!(context.loader_status(), TargetStatus::default());
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_loader_all_entry_points_intercepted_once() {
        let (context, calls, modules) =
            context_with(OverrideSettings::default(), FakePrimitive::default());
        load_targets(&modules);

        assert_eq!(context.discover_loader(), Discovery::Installed);
        assert_eq!(context.discover_loader(), Discovery::AlreadyAttempted);

        let calls = calls.lock();
        let names = created(&calls);
        assert_eq!(names.len(), 20);
        assert!(names.iter().any(|n| n == "NVSDK_NGX_VULKAN_Init_ProjectID_Ext"));
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Enable(_))).count(), 20);

        assert_eq!(context.discovery.lock().acquire_hooks.len(), 9);
        assert_eq!(
            context.loader_status(),
            TargetStatus {
                attempted: true,
                succeeded: true
            }
        );

        let original = context
            .originals()
            .load(HookSlot::Entry(EntryPoint::D3D12Init))
            .unwrap();
        let target = LOADER_BASE + 0x100 * (EntryPoint::D3D12Init.index() + 1);
        assert_eq!(original.as_ptr() as usize, target + 1);
    }

    #[test]
    fn test_loader_missing_export_installs_nothing() {
        let (context, calls, modules) =
            context_with(OverrideSettings::default(), FakePrimitive::default());
        let exports: Vec<_> = loader_exports()
            .into_iter()
            .filter(|(name, _)| *name != "NVSDK_NGX_VULKAN_Init_Ext2")
            .collect();
        modules.load(LOADER_MODULE, LOADER_BASE, &exports);

        assert_eq!(context.discover_loader(), Discovery::Failed);
        assert!(calls.lock().is_empty());
        assert_eq!(
            context.loader_status(),
            TargetStatus {
                attempted: true,
                succeeded: false
            }
        );

        // Failure is final even once the export appears
        modules.load(LOADER_MODULE, LOADER_BASE, &loader_exports());
        assert_eq!(context.discover_loader(), Discovery::AlreadyAttempted);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_loader_install_failure_discards_created() {
        let failing = LOADER_BASE + 0x100 * (EntryPoint::VulkanInit.index() + 1);
        let (context, calls, modules) =
            context_with(OverrideSettings::default(), FakePrimitive::failing_at(failing));
        load_targets(&modules);

        assert_eq!(context.discover_loader(), Discovery::Failed);

        let calls = calls.lock();
        let created = created(&calls).len();
        let removed = calls.iter().filter(|c| matches!(c, Call::Remove(_))).count();
        assert_eq!(created, EntryPoint::VulkanInit.index());
        assert_eq!(removed, created);
        assert!(context.discovery.lock().acquire_hooks.is_empty());
    }

    #[test]
    fn test_engine_registry_import_patched() {
        let (context, calls, modules) =
            context_with(OverrideSettings::default(), FakePrimitive::default());
        load_targets(&modules);

        assert_eq!(context.discover_engine(), Discovery::Installed);
        assert_eq!(context.discover_engine(), Discovery::AlreadyAttempted);

        let calls = calls.lock();
        assert_eq!(
            calls[0],
            Call::CreateImport {
                name: "RegQueryValueExW".into(),
                module: "advapi32.dll".into(),
                target: REG_QUERY,
            }
        );
        assert!(matches!(calls[1], Call::Enable(_)));
        assert_eq!(
            context
                .originals()
                .load(HookSlot::RegistryQuery)
                .map(|p| p.as_ptr() as usize),
            Some(REG_QUERY)
        );
    }

    #[test]
    fn test_engine_without_registry_module_fails_for_good() {
        let (context, calls, modules) =
            context_with(OverrideSettings::default(), FakePrimitive::default());
        modules.load(ENGINE_MODULE, ENGINE_BASE, &[]);

        assert_eq!(context.discover_engine(), Discovery::Failed);
        modules.load(REGISTRY_MODULE, ADVAPI_BASE, &[(REGISTRY_QUERY_EXPORT, REG_QUERY)]);
        assert_eq!(context.discover_engine(), Discovery::AlreadyAttempted);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_concurrent_discovery_installs_once() {
        let (context, calls, modules) =
            context_with(OverrideSettings::default(), FakePrimitive::default());
        load_targets(&modules);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    context.discover_loader();
                    context.discover_engine();
                });
            }
        });

        assert_eq!(created(&calls.lock()).len(), 21);
    }
}
