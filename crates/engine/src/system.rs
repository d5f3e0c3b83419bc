//! Module lookup backed by the operating system loader

use std::ffi::{c_void, CString};
use std::ptr::NonNull;

use crate::loader::{ModuleHandle, ModuleSource};

/// [`ModuleSource`] over the modules resident in this process
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemModules;

#[cfg(windows)]
impl ModuleSource for SystemModules {
    fn find_module(&self, name: &str) -> Option<ModuleHandle> {
        use windows::core::PCSTR;
        use windows::Win32::System::LibraryLoader::GetModuleHandleA;

        let c_name = CString::new(name).ok()?;
        let module = unsafe { GetModuleHandleA(PCSTR(c_name.as_ptr() as *const u8)) }.ok()?;
        NonNull::new(module.0 as *mut c_void).map(ModuleHandle::new)
    }

    fn find_export(&self, module: ModuleHandle, name: &str) -> Option<NonNull<c_void>> {
        use windows::core::PCSTR;
        use windows::Win32::Foundation::HMODULE;
        use windows::Win32::System::LibraryLoader::GetProcAddress;

        let c_name = CString::new(name).ok()?;
        let proc = unsafe {
            GetProcAddress(
                HMODULE(module.as_ptr()),
                PCSTR(c_name.as_ptr() as *const u8),
            )
        }?;
        NonNull::new(proc as usize as *mut c_void)
    }
}

#[cfg(unix)]
impl ModuleSource for SystemModules {
    fn find_module(&self, name: &str) -> Option<ModuleHandle> {
        let c_name = CString::new(name).ok()?;
        // RTLD_NOLOAD only succeeds for modules already mapped. The extra
        // reference it takes is kept for the process lifetime.
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD) };
        NonNull::new(handle).map(ModuleHandle::new)
    }

    fn find_export(&self, module: ModuleHandle, name: &str) -> Option<NonNull<c_void>> {
        let c_name = CString::new(name).ok()?;
        let symbol = unsafe { libc::dlsym(module.as_ptr(), c_name.as_ptr()) };
        NonNull::new(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_module_is_not_found() {
        assert!(SystemModules
            .find_module("ngxtweaks-definitely-not-loaded.module")
            .is_none());
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        assert!(SystemModules.find_module("bad\0name").is_none());
    }
}
