//! Export resolution over a [`ModuleSource`]

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::error::ExportError;

/// Handle of a resident module (its base address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(NonNull<c_void>);

// SAFETY: A module handle is an address owned by the OS loader; it is never
// dereferenced through this type.
unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

impl ModuleHandle {
    pub fn new(base: NonNull<c_void>) -> Self {
        Self(base)
    }

    /// Module base address
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Source of resident modules and their exports
pub trait ModuleSource: Send + Sync {
    /// Find a module that is already loaded, by file name
    fn find_module(&self, name: &str) -> Option<ModuleHandle>;

    /// Resolve an exported symbol of a resident module
    fn find_export(&self, module: ModuleHandle, name: &str) -> Option<NonNull<c_void>>;
}

/// Wrapper around one resident module's export table
pub struct ExportResolver<'a> {
    source: &'a dyn ModuleSource,
    module: ModuleHandle,
    name: &'a str,
}

impl<'a> ExportResolver<'a> {
    /// Open a resolver for a resident module
    ///
    /// # Arguments
    /// * `source` - Where modules are looked up
    /// * `name` - Module file name (e.g., "_nvngx.dll")
    pub fn open(source: &'a dyn ModuleSource, name: &'a str) -> Result<Self, ExportError> {
        let module = source
            .find_module(name)
            .ok_or_else(|| ExportError::ModuleNotLoaded(name.to_string()))?;
        Ok(Self {
            source,
            module,
            name,
        })
    }

    pub fn module_name(&self) -> &str {
        self.name
    }

    /// Get an export by name
    pub fn get(&self, export: &str) -> Result<NonNull<c_void>, ExportError> {
        self.source
            .find_export(self.module, export)
            .ok_or_else(|| ExportError::NotFound(format!("{}!{}", self.name, export)))
    }

    /// Try to get an export, returning None on failure instead of error
    pub fn try_get(&self, export: &str) -> Option<NonNull<c_void>> {
        self.get(export).ok()
    }
}

/// Resolve every item of a required list, all-or-nothing
///
/// Every item is attempted so the error names all missing exports, not only
/// the first one.
#[tracing::instrument(skip_all, fields(module = resolver.module_name()))]
pub fn resolve_all<T: Copy>(
    resolver: &ExportResolver<'_>,
    items: &[T],
    export_name: impl Fn(T) -> &'static str,
) -> Result<Vec<(T, NonNull<c_void>)>, ExportError> {
    let mut resolved = Vec::with_capacity(items.len());
    let mut missing = Vec::new();

    for &item in items {
        let name = export_name(item);
        match resolver.try_get(name) {
            Some(address) => {
                tracing::debug!("{}: {:p}", name, address.as_ptr());
                resolved.push((item, address));
            }
            None => missing.push(name),
        }
    }

    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(ExportError::Incomplete {
            module: resolver.module_name().to_string(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TableModules {
        base: ModuleHandle,
        exports: HashMap<&'static str, usize>,
    }

    impl ModuleSource for TableModules {
        fn find_module(&self, name: &str) -> Option<ModuleHandle> {
            name.eq_ignore_ascii_case("test.dll")
                .then_some(self.base)
        }

        fn find_export(&self, _module: ModuleHandle, name: &str) -> Option<NonNull<c_void>> {
            self.exports
                .get(name)
                .and_then(|&addr| NonNull::new(addr as *mut c_void))
        }
    }

    fn modules() -> TableModules {
        TableModules {
            base: ModuleHandle::new(NonNull::new(0x1000 as *mut c_void).unwrap()),
            exports: HashMap::from([("A", 0x1100), ("B", 0x1200)]),
        }
    }

    fn assert_module_source<S: ModuleSource>(_: &S) {}

    #[test]
    fn test_table_source_is_a_module_source() {
        let source = modules();
        assert_module_source(&source);
        let handle = source.find_module("Test.DLL").unwrap();
        assert_eq!(handle.as_ptr() as usize, 0x1000);
    }

    #[test]
    fn test_open_missing_module() {
        let source = modules();
        let err = ExportResolver::open(&source, "other.dll").err().unwrap();
        assert!(matches!(err, ExportError::ModuleNotLoaded(_)));
    }

    #[test]
    fn test_resolve_all_success() {
        let source = modules();
        let resolver = ExportResolver::open(&source, "TEST.dll").unwrap();
        let resolved = resolve_all(&resolver, &["A", "B"], |n| n).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].1.as_ptr() as usize, 0x1200);
    }

    #[test]
    fn test_resolve_all_reports_every_missing_export() {
        let source = modules();
        let resolver = ExportResolver::open(&source, "test.dll").unwrap();
        let err = resolve_all(&resolver, &["A", "C", "D"], |n| n).unwrap_err();
        match err {
            ExportError::Incomplete { missing, .. } => assert_eq!(missing, vec!["C", "D"]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
