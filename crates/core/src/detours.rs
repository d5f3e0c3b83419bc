//! Replacement functions installed over intercepted calls
//!
//! Each detour looks up the process-wide context and the original it
//! replaces, applies the current policy, and forwards. Until setup has
//! published both, a detour fails the call the way the runtime would.

use std::ffi::{c_char, c_void, CStr};

use ngxtweaks_sdk::functions::*;
use ngxtweaks_sdk::modules::REGISTRY_NOT_FOUND;
use ngxtweaks_sdk::{EntryPoint, NgxResult, NGX_RESULT_FAIL};

use crate::context::{context, DetourTable, HookSlot, TweakContext};
use crate::policy::identity::{effective_app_id, effective_project_id};
use crate::policy::params::{preset_injections, rewrite_get_ui, rewrite_set_i};
use crate::registry::apply_indicator_override;

/// Context and typed original for `slot`
///
/// # Safety
/// `F` must match the slot's signature.
unsafe fn resolve<F: Copy>(slot: HookSlot) -> Option<(&'static TweakContext, F)> {
    let ctx = context()?;
    let original = ctx.originals().get::<F>(slot)?;
    Some((ctx, original))
}

/// Initializer detour rewriting the identity argument `$id`
macro_rules! init_detour {
    ($name:ident: $entry:ident, $fn_ty:ty, $id:ident => $rewrite:path, ($($arg:ident: $ty:ty),* $(,)?)) => {
        paste::paste! {
            unsafe extern "C" fn [<$name _detour>]($($arg: $ty),*) -> NgxResult {
                let Some((ctx, original)) = resolve::<$fn_ty>(HookSlot::Entry(EntryPoint::$entry)) else {
                    return NGX_RESULT_FAIL;
                };
                let settings = ctx.settings();
                if settings.override_app_id {
                    tracing::debug!("{}: using generic identity", EntryPoint::$entry.export_name());
                }
                let $id = $rewrite(&settings, $id);
                original($($arg),*)
            }
        }
    };
}

/// Parameter-acquisition detour handing the returned object to the context
macro_rules! acquire_detour {
    ($name:ident: $entry:ident) => {
        paste::paste! {
            unsafe extern "C" fn [<$name _detour>](out: *mut *mut NgxParameter) -> NgxResult {
                let Some((ctx, original)) =
                    resolve::<AcquireParametersFn>(HookSlot::Entry(EntryPoint::$entry))
                else {
                    return NGX_RESULT_FAIL;
                };
                let result = original(out);
                if !out.is_null() {
                    ctx.on_parameters_acquired(*out);
                }
                result
            }
        }
    };
}

init_detour!(d3d11_init: D3D11Init, D3dInitFn, app_id => effective_app_id,
    (app_id: u64, data_path: *const u16, device: Opaque, feature_info: *const c_void, sdk_version: u32));
init_detour!(d3d11_init_ext: D3D11InitExt, D3dInitExtFn, app_id => effective_app_id,
    (app_id: u64, data_path: *const u16, a3: Opaque, a4: Opaque, a5: Opaque));
init_detour!(d3d11_init_project_id: D3D11InitProjectId, D3dInitProjectIdFn, project_id => effective_project_id,
    (project_id: *const c_char, engine_type: i32, engine_version: *const c_char, data_path: *const u16,
     device: Opaque, feature_info: *const c_void, sdk_version: u32));

init_detour!(d3d12_init: D3D12Init, D3dInitFn, app_id => effective_app_id,
    (app_id: u64, data_path: *const u16, device: Opaque, feature_info: *const c_void, sdk_version: u32));
init_detour!(d3d12_init_ext: D3D12InitExt, D3dInitExtFn, app_id => effective_app_id,
    (app_id: u64, data_path: *const u16, a3: Opaque, a4: Opaque, a5: Opaque));
init_detour!(d3d12_init_project_id: D3D12InitProjectId, D3dInitProjectIdFn, project_id => effective_project_id,
    (project_id: *const c_char, engine_type: i32, engine_version: *const c_char, data_path: *const u16,
     device: Opaque, feature_info: *const c_void, sdk_version: u32));

init_detour!(vulkan_init: VulkanInit, VkInitFn, app_id => effective_app_id,
    (app_id: u64, a2: Opaque, a3: Opaque, a4: Opaque, a5: Opaque, a6: Opaque));
init_detour!(vulkan_init_ext: VulkanInitExt, VkInitExtFn, app_id => effective_app_id,
    (app_id: u64, a2: Opaque, a3: Opaque, a4: Opaque, a5: Opaque, a6: Opaque, a7: Opaque));
init_detour!(vulkan_init_ext2: VulkanInitExt2, VkInitExt2Fn, app_id => effective_app_id,
    (app_id: u64, a2: Opaque, a3: Opaque, a4: Opaque, a5: Opaque, a6: Opaque, a7: Opaque, a8: Opaque, a9: Opaque));
init_detour!(vulkan_init_project_id: VulkanInitProjectId, VkInitProjectIdFn, project_id => effective_project_id,
    (project_id: *const c_char, a2: Opaque, a3: Opaque, a4: Opaque, a5: Opaque, a6: Opaque, a7: Opaque,
     a8: Opaque, a9: Opaque));
init_detour!(vulkan_init_project_id_ext: VulkanInitProjectIdExt, VkInitProjectIdExtFn, project_id => effective_project_id,
    (project_id: *const c_char, a2: Opaque, a3: Opaque, a4: Opaque, a5: Opaque, a6: Opaque, a7: Opaque,
     a8: Opaque, a9: Opaque, a10: Opaque, a11: Opaque));

acquire_detour!(d3d11_allocate_parameters: D3D11AllocateParameters);
acquire_detour!(d3d11_get_capability_parameters: D3D11GetCapabilityParameters);
acquire_detour!(d3d11_get_parameters: D3D11GetParameters);
acquire_detour!(d3d12_allocate_parameters: D3D12AllocateParameters);
acquire_detour!(d3d12_get_capability_parameters: D3D12GetCapabilityParameters);
acquire_detour!(d3d12_get_parameters: D3D12GetParameters);
acquire_detour!(vulkan_allocate_parameters: VulkanAllocateParameters);
acquire_detour!(vulkan_get_capability_parameters: VulkanGetCapabilityParameters);
acquire_detour!(vulkan_get_parameters: VulkanGetParameters);

unsafe extern "C" fn set_i_detour(this: *mut NgxParameter, name: *const c_char, value: i32) {
    let Some((ctx, original)) = resolve::<ParamSetIFn>(HookSlot::SetI) else {
        return;
    };
    let value = if name.is_null() {
        value
    } else {
        rewrite_set_i(&ctx.settings(), ctx.quality_tier(), CStr::from_ptr(name), value)
    };
    original(this, name, value)
}

unsafe extern "C" fn set_ui_detour(this: *mut NgxParameter, name: *const c_char, value: u32) {
    let Some((ctx, original)) = resolve::<ParamSetUIFn>(HookSlot::SetUI) else {
        return;
    };
    original(this, name, value);

    let settings = ctx.settings();
    for (key, preset) in preset_injections(&settings) {
        original(this, key.as_ptr(), preset);
    }
}

unsafe extern "C" fn get_ui_detour(
    this: *mut NgxParameter,
    name: *const c_char,
    out: *mut u32,
) -> NgxResult {
    let Some((ctx, original)) = resolve::<ParamGetUIFn>(HookSlot::GetUI) else {
        return NGX_RESULT_FAIL;
    };
    let result = original(this, name, out);
    if name.is_null() || out.is_null() {
        return result;
    }

    rewrite_get_ui(
        &ctx.settings(),
        ctx.quality_tier(),
        CStr::from_ptr(name),
        result,
        &mut *out,
        |key, slot| {
            original(this, key.as_ptr(), slot);
        },
    );
    result
}

unsafe extern "system" fn load_library_detour(
    file_name: *const u16,
    file: *mut c_void,
    flags: u32,
) -> *mut c_void {
    let Some((ctx, original)) = resolve::<LoadLibraryExWFn>(HookSlot::LoadLibrary) else {
        return std::ptr::null_mut();
    };
    let module = original(file_name, file, flags);
    ctx.on_library_loaded();
    module
}

unsafe extern "system" fn registry_query_detour(
    key: *mut c_void,
    value_name: *const u16,
    reserved: *mut u32,
    value_type: *mut u32,
    data: *mut u8,
    data_len: *mut u32,
) -> i32 {
    let Some((ctx, original)) = resolve::<RegQueryValueExWFn>(HookSlot::RegistryQuery) else {
        return REGISTRY_NOT_FOUND;
    };
    let status = original(key, value_name, reserved, value_type, data, data_len);
    apply_indicator_override(ctx.settings().dlss_hud, value_name, data, data_len, status)
}

fn entry_detour(entry: EntryPoint) -> *const () {
    match entry {
        EntryPoint::D3D11Init => d3d11_init_detour as *const (),
        EntryPoint::D3D11InitExt => d3d11_init_ext_detour as *const (),
        EntryPoint::D3D11InitProjectId => d3d11_init_project_id_detour as *const (),
        EntryPoint::D3D11AllocateParameters => d3d11_allocate_parameters_detour as *const (),
        EntryPoint::D3D11GetCapabilityParameters => d3d11_get_capability_parameters_detour as *const (),
        EntryPoint::D3D11GetParameters => d3d11_get_parameters_detour as *const (),
        EntryPoint::D3D12Init => d3d12_init_detour as *const (),
        EntryPoint::D3D12InitExt => d3d12_init_ext_detour as *const (),
        EntryPoint::D3D12InitProjectId => d3d12_init_project_id_detour as *const (),
        EntryPoint::D3D12AllocateParameters => d3d12_allocate_parameters_detour as *const (),
        EntryPoint::D3D12GetCapabilityParameters => d3d12_get_capability_parameters_detour as *const (),
        EntryPoint::D3D12GetParameters => d3d12_get_parameters_detour as *const (),
        EntryPoint::VulkanInit => vulkan_init_detour as *const (),
        EntryPoint::VulkanInitExt => vulkan_init_ext_detour as *const (),
        EntryPoint::VulkanInitExt2 => vulkan_init_ext2_detour as *const (),
        EntryPoint::VulkanInitProjectId => vulkan_init_project_id_detour as *const (),
        EntryPoint::VulkanInitProjectIdExt => vulkan_init_project_id_ext_detour as *const (),
        EntryPoint::VulkanAllocateParameters => vulkan_allocate_parameters_detour as *const (),
        EntryPoint::VulkanGetCapabilityParameters => vulkan_get_capability_parameters_detour as *const (),
        EntryPoint::VulkanGetParameters => vulkan_get_parameters_detour as *const (),
    }
}

/// Detours that act on the process-wide context
pub fn live_detours() -> DetourTable {
    DetourTable::from_fn(|slot| match slot {
        HookSlot::Entry(entry) => entry_detour(entry),
        HookSlot::SetI => set_i_detour as *const (),
        HookSlot::SetUI => set_ui_detour as *const (),
        HookSlot::GetUI => get_ui_detour as *const (),
        HookSlot::LoadLibrary => load_library_detour as *const (),
        HookSlot::RegistryQuery => registry_query_detour as *const (),
    })
}
