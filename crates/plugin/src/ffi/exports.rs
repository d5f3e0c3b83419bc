//! C-compatible exports and the process-attach entry

use std::ffi::c_char;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::instrument;

use crate::setup;

static NAME: &[u8] = b"ngxtweaks\0";
static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();

static ATTACHED: AtomicBool = AtomicBool::new(false);

fn run_setup() -> bool {
    match std::panic::catch_unwind(setup::run) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("Setup failed: {}", e);
            false
        }
        Err(_) => {
            tracing::error!("Panic during setup");
            false
        }
    }
}

/// Start the layer on a new thread; only the first call does anything
///
/// Returns whether the setup thread was started by this call.
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn ngxtweaks_attach() -> bool {
    if ATTACHED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let spawned = std::thread::Builder::new()
        .name("ngxtweaks-setup".into())
        .spawn(|| {
            run_setup();
        });

    if spawned.is_err() {
        ATTACHED.store(false, Ordering::SeqCst);
        return false;
    }
    true
}

/// Stop background work ahead of unload
///
/// Never blocks, so it is safe to call while the loader lock is held.
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn ngxtweaks_detach() {
    let _ = std::panic::catch_unwind(|| {
        setup::stop_watcher();
        crate::shutdown();
    });
}

#[no_mangle]
pub extern "C" fn ngxtweaks_get_name() -> *const c_char {
    NAME.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn ngxtweaks_get_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

/// Windows module entry point
///
/// # Safety
/// Called by the OS loader only.
#[cfg(windows)]
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn DllMain(
    module: windows::Win32::Foundation::HINSTANCE,
    reason: u32,
    _reserved: *mut std::ffi::c_void,
) -> windows::Win32::Foundation::BOOL {
    use windows::Win32::Foundation::{HMODULE, TRUE};
    use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    match reason {
        DLL_PROCESS_ATTACH => {
            let _ = DisableThreadLibraryCalls(HMODULE(module.0));
            ngxtweaks_attach();
        }
        DLL_PROCESS_DETACH => ngxtweaks_detach(),
        _ => {}
    }
    TRUE
}
