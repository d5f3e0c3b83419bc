//! Function pointer signatures of the intercepted calls
//!
//! Arguments the layer never inspects are kept opaque. On x86_64 every
//! integer and pointer argument occupies one register or stack slot, so an
//! opaque pointer forwards them unchanged.

use std::ffi::{c_char, c_void};

use crate::params::NgxResult;

/// Opaque argument forwarded untouched
pub type Opaque = *mut c_void;

/// Opaque parameter object allocated by the runtime
///
/// The first field is a pointer to its dispatch table.
#[repr(C)]
pub struct NgxParameter {
    pub vtable: *const *const c_void,
}

/// `NVSDK_NGX_D3D1x_Init`
pub type D3dInitFn = unsafe extern "C" fn(
    app_id: u64,
    data_path: *const u16,
    device: Opaque,
    feature_info: *const c_void,
    sdk_version: u32,
) -> NgxResult;

/// `NVSDK_NGX_D3D1x_Init_Ext`
pub type D3dInitExtFn =
    unsafe extern "C" fn(app_id: u64, data_path: *const u16, a3: Opaque, a4: Opaque, a5: Opaque) -> NgxResult;

/// `NVSDK_NGX_D3D1x_Init_ProjectID`
pub type D3dInitProjectIdFn = unsafe extern "C" fn(
    project_id: *const c_char,
    engine_type: i32,
    engine_version: *const c_char,
    data_path: *const u16,
    device: Opaque,
    feature_info: *const c_void,
    sdk_version: u32,
) -> NgxResult;

/// `NVSDK_NGX_VULKAN_Init`
pub type VkInitFn =
    unsafe extern "C" fn(app_id: u64, a2: Opaque, a3: Opaque, a4: Opaque, a5: Opaque, a6: Opaque) -> NgxResult;

/// `NVSDK_NGX_VULKAN_Init_Ext`
pub type VkInitExtFn = unsafe extern "C" fn(
    app_id: u64,
    a2: Opaque,
    a3: Opaque,
    a4: Opaque,
    a5: Opaque,
    a6: Opaque,
    a7: Opaque,
) -> NgxResult;

/// `NVSDK_NGX_VULKAN_Init_Ext2`
pub type VkInitExt2Fn = unsafe extern "C" fn(
    app_id: u64,
    a2: Opaque,
    a3: Opaque,
    a4: Opaque,
    a5: Opaque,
    a6: Opaque,
    a7: Opaque,
    a8: Opaque,
    a9: Opaque,
) -> NgxResult;

/// `NVSDK_NGX_VULKAN_Init_ProjectID`
pub type VkInitProjectIdFn = unsafe extern "C" fn(
    project_id: *const c_char,
    a2: Opaque,
    a3: Opaque,
    a4: Opaque,
    a5: Opaque,
    a6: Opaque,
    a7: Opaque,
    a8: Opaque,
    a9: Opaque,
) -> NgxResult;

/// `NVSDK_NGX_VULKAN_Init_ProjectID_Ext`
pub type VkInitProjectIdExtFn = unsafe extern "C" fn(
    project_id: *const c_char,
    a2: Opaque,
    a3: Opaque,
    a4: Opaque,
    a5: Opaque,
    a6: Opaque,
    a7: Opaque,
    a8: Opaque,
    a9: Opaque,
    a10: Opaque,
    a11: Opaque,
) -> NgxResult;

/// `NVSDK_NGX_*_AllocateParameters`, `GetCapabilityParameters`, `GetParameters`
pub type AcquireParametersFn = unsafe extern "C" fn(out: *mut *mut NgxParameter) -> NgxResult;

/// `NVSDK_NGX_Parameter::SetI`
pub type ParamSetIFn = unsafe extern "C" fn(this: *mut NgxParameter, name: *const c_char, value: i32);

/// `NVSDK_NGX_Parameter::SetUI`
pub type ParamSetUIFn = unsafe extern "C" fn(this: *mut NgxParameter, name: *const c_char, value: u32);

/// `NVSDK_NGX_Parameter::GetUI`
pub type ParamGetUIFn =
    unsafe extern "C" fn(this: *mut NgxParameter, name: *const c_char, out: *mut u32) -> NgxResult;

/// `LoadLibraryExW`
pub type LoadLibraryExWFn =
    unsafe extern "system" fn(file_name: *const u16, file: *mut c_void, flags: u32) -> *mut c_void;

/// `RegQueryValueExW`
pub type RegQueryValueExWFn = unsafe extern "system" fn(
    key: *mut c_void,
    value_name: *const u16,
    reserved: *mut u32,
    value_type: *mut u32,
    data: *mut u8,
    data_len: *mut u32,
) -> i32;
