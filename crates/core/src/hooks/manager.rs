//! Unified intercept API
//!
//! [`InterceptPrimitive`] is the seam between the interception logic and the
//! code patching underneath it: [`HookManager`] patches real code, tests
//! substitute a recording fake.

use super::iat::{self, ImportHookKey};
use super::inline::{self, HookError, InlineHookKey};

/// Unified hook key (can be any intercept type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKey {
    Inline(InlineHookKey),
    Import(ImportHookKey),
}

impl From<InlineHookKey> for HookKey {
    fn from(key: InlineHookKey) -> Self {
        HookKey::Inline(key)
    }
}

impl From<ImportHookKey> for HookKey {
    fn from(key: ImportHookKey) -> Self {
        HookKey::Import(key)
    }
}

/// Low-level interception operations
///
/// Creation never enables an intercept; callers enable it once they have
/// stored the returned original.
pub trait InterceptPrimitive: Send + Sync {
    /// Prepare a detour of the function at `target`
    ///
    /// # Safety
    /// `target` must be a function entry and `detour` must share its
    /// signature and ABI.
    unsafe fn create(
        &self,
        name: &str,
        target: *const (),
        detour: *const (),
    ) -> Result<(HookKey, *const ()), HookError>;

    /// Prepare a patch of `image`'s import of `target` from `import_module`
    ///
    /// # Safety
    /// `image` must be a mapped PE image and `detour` must share the
    /// signature and ABI of `target`.
    unsafe fn create_import(
        &self,
        name: &str,
        image: *const u8,
        import_module: &str,
        target: *const (),
        detour: *const (),
    ) -> Result<(HookKey, *const ()), HookError>;

    fn enable(&self, key: HookKey) -> Result<(), HookError>;

    fn disable(&self, key: HookKey) -> Result<(), HookError>;

    /// Disable and forget an intercept
    fn remove(&self, key: HookKey) -> Result<(), HookError>;
}

/// Central hook manager
#[derive(Debug, Default, Clone, Copy)]
pub struct HookManager;

impl HookManager {
    #[cfg(test)]
    pub fn is_enabled(key: HookKey) -> bool {
        match key {
            HookKey::Inline(k) => inline::is_inline_hook_enabled(k),
            HookKey::Import(k) => iat::is_import_hook_enabled(k),
        }
    }
}

impl InterceptPrimitive for HookManager {
    unsafe fn create(
        &self,
        name: &str,
        target: *const (),
        detour: *const (),
    ) -> Result<(HookKey, *const ()), HookError> {
        inline::create_inline_hook(name, target, detour).map(|(key, original)| (key.into(), original))
    }

    unsafe fn create_import(
        &self,
        name: &str,
        image: *const u8,
        import_module: &str,
        target: *const (),
        detour: *const (),
    ) -> Result<(HookKey, *const ()), HookError> {
        iat::create_import_hook(name, image, import_module, target, detour)
            .map(|(key, original)| (key.into(), original))
    }

    fn enable(&self, key: HookKey) -> Result<(), HookError> {
        match key {
            HookKey::Inline(k) => inline::enable_inline_hook(k),
            HookKey::Import(k) => iat::enable_import_hook(k),
        }
    }

    fn disable(&self, key: HookKey) -> Result<(), HookError> {
        match key {
            HookKey::Inline(k) => inline::disable_inline_hook(k),
            HookKey::Import(k) => iat::disable_import_hook(k),
        }
    }

    fn remove(&self, key: HookKey) -> Result<(), HookError> {
        match key {
            HookKey::Inline(k) => inline::remove_inline_hook(k),
            HookKey::Import(k) => iat::remove_import_hook(k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_report_not_found() {
        let manager = HookManager;
        for key in [
            HookKey::from(InlineHookKey::default()),
            HookKey::from(ImportHookKey::default()),
        ] {
            assert!(matches!(manager.enable(key), Err(HookError::NotFound)));
            assert!(matches!(manager.disable(key), Err(HookError::NotFound)));
            assert!(!HookManager::is_enabled(key));
        }
    }
}
