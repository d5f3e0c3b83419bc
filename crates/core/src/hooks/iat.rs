//! Import address table patches
//!
//! Redirects one module's imported function pointer without touching the
//! exporting module, so other callers of the same function are unaffected.
//! Works on any mapped PE image (the walk only reads RVAs relative to the
//! image base), which keeps it testable on synthetic images.

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};
use std::ffi::c_void;
use std::sync::LazyLock;

use super::inline::HookError;

new_key_type! {
    /// Handle for an import table patch
    pub struct ImportHookKey;
}

const DOS_MAGIC: u16 = 0x5A4D;
const NT_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;

/// Offset of the optional header inside the NT headers
const OPTIONAL_HEADER_OFFSET: usize = 24;

/// Offset of the import data directory inside the optional header
#[cfg(target_pointer_width = "64")]
const IMPORT_DIRECTORY_OFFSET: usize = 120;
#[cfg(target_pointer_width = "32")]
const IMPORT_DIRECTORY_OFFSET: usize = 104;

#[cfg(target_pointer_width = "64")]
const NATIVE_MAGIC: u16 = PE32_PLUS_MAGIC;
#[cfg(target_pointer_width = "32")]
const NATIVE_MAGIC: u16 = PE32_MAGIC;

/// Size of IMAGE_IMPORT_DESCRIPTOR
const DESCRIPTOR_SIZE: usize = 20;

unsafe fn read_u16(base: *const u8, offset: usize) -> u16 {
    (base.add(offset) as *const u16).read_unaligned()
}

unsafe fn read_u32(base: *const u8, offset: usize) -> u32 {
    (base.add(offset) as *const u32).read_unaligned()
}

unsafe fn c_str_at(base: *const u8, offset: usize) -> &'static [u8] {
    std::ffi::CStr::from_ptr(base.add(offset) as *const std::ffi::c_char).to_bytes()
}

/// Locate the import table slot in `image` holding `current` for a function
/// imported from `import_module` (matched case-insensitively).
///
/// # Safety
/// `image` must be the base of a mapped PE image of the native bitness.
pub unsafe fn find_import_slot(
    image: *const u8,
    import_module: &str,
    current: *const c_void,
) -> Result<*mut *const c_void, HookError> {
    if image.is_null() {
        return Err(HookError::InvalidAddress(0));
    }
    if read_u16(image, 0) != DOS_MAGIC {
        return Err(HookError::MalformedImage("missing DOS header"));
    }

    let nt = read_u32(image, 0x3C) as usize;
    if read_u32(image, nt) != NT_SIGNATURE {
        return Err(HookError::MalformedImage("missing NT signature"));
    }

    let optional = nt + OPTIONAL_HEADER_OFFSET;
    match read_u16(image, optional) {
        NATIVE_MAGIC => {}
        PE32_MAGIC | PE32_PLUS_MAGIC => {
            return Err(HookError::Unsupported("image bitness differs from process"))
        }
        _ => return Err(HookError::MalformedImage("unknown optional header magic")),
    }

    let import_rva = read_u32(image, optional + IMPORT_DIRECTORY_OFFSET) as usize;
    if import_rva == 0 {
        return Err(HookError::MalformedImage("no import directory"));
    }

    let not_found = || HookError::ImportNotFound {
        module: import_module.to_string(),
        function: format!("{:x}", current as usize),
    };

    let mut descriptor = import_rva;
    loop {
        let lookup_rva = read_u32(image, descriptor);
        let name_rva = read_u32(image, descriptor + 12) as usize;
        let thunk_rva = read_u32(image, descriptor + 16) as usize;

        if name_rva == 0 || (lookup_rva == 0 && thunk_rva == 0) {
            return Err(not_found());
        }

        let name = c_str_at(image, name_rva);
        if name.eq_ignore_ascii_case(import_module.as_bytes()) && thunk_rva != 0 {
            let mut slot = image.add(thunk_rva) as *mut *const c_void;
            while !(*slot).is_null() {
                if *slot == current {
                    return Ok(slot);
                }
                slot = slot.add(1);
            }
        }

        descriptor += DESCRIPTOR_SIZE;
    }
}

struct ImportHookEntry {
    slot: *mut *const c_void,
    original: *const c_void,
    replacement: *const c_void,
    enabled: bool,
    name: String,
}

// SAFETY: Entries are only reached through the registry lock
unsafe impl Send for ImportHookEntry {}
unsafe impl Sync for ImportHookEntry {}

static IMPORT_HOOKS: LazyLock<RwLock<SlotMap<ImportHookKey, ImportHookEntry>>> =
    LazyLock::new(|| RwLock::new(SlotMap::with_key()));

unsafe fn write_slot(slot: *mut *const c_void, value: *const c_void) -> Result<(), HookError> {
    let _guard = region::protect_with_handle(
        slot as *const u8,
        std::mem::size_of::<usize>(),
        region::Protection::READ_WRITE,
    )
    .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    slot.write_volatile(value);
    Ok(())
}

/// Prepare a patch of `image`'s import of `target` from `import_module`
/// without enabling it
///
/// # Safety
/// - `image` must be the base of a mapped PE image
/// - `replacement` must have the same signature and ABI as `target`
///
/// # Returns
/// A key to manage the patch, and the original function pointer
pub unsafe fn create_import_hook(
    name: &str,
    image: *const u8,
    import_module: &str,
    target: *const (),
    replacement: *const (),
) -> Result<(ImportHookKey, *const ()), HookError> {
    let slot = find_import_slot(image, import_module, target as *const c_void).map_err(
        |e| match e {
            HookError::ImportNotFound { module, .. } => HookError::ImportNotFound {
                module,
                function: name.to_string(),
            },
            other => other,
        },
    )?;

    tracing::debug!(
        "Creating import hook '{}': image={:x}, slot={:x}",
        name,
        image as usize,
        slot as usize
    );

    let entry = ImportHookEntry {
        slot,
        original: target as *const c_void,
        replacement: replacement as *const c_void,
        enabled: false,
        name: name.to_string(),
    };

    let key = IMPORT_HOOKS.write().insert(entry);

    tracing::info!("Created import hook '{}' from {}", name, import_module);

    Ok((key, target))
}

/// Point the import slot at the replacement
pub fn enable_import_hook(key: ImportHookKey) -> Result<(), HookError> {
    let mut hooks = IMPORT_HOOKS.write();
    let entry = hooks.get_mut(key).ok_or(HookError::NotFound)?;

    if entry.enabled {
        return Ok(());
    }

    unsafe { write_slot(entry.slot, entry.replacement) }
        .map_err(|e| HookError::EnableFailed(e.to_string()))?;

    entry.enabled = true;
    tracing::debug!("Enabled import hook '{}'", entry.name);
    Ok(())
}

/// Restore the original import slot value
pub fn disable_import_hook(key: ImportHookKey) -> Result<(), HookError> {
    let mut hooks = IMPORT_HOOKS.write();
    let entry = hooks.get_mut(key).ok_or(HookError::NotFound)?;

    if !entry.enabled {
        return Ok(());
    }

    unsafe { write_slot(entry.slot, entry.original) }
        .map_err(|e| HookError::DisableFailed(e.to_string()))?;

    entry.enabled = false;
    tracing::debug!("Disabled import hook '{}'", entry.name);
    Ok(())
}

/// Restore and forget an import patch
pub fn remove_import_hook(key: ImportHookKey) -> Result<(), HookError> {
    disable_import_hook(key)?;
    let entry = IMPORT_HOOKS.write().remove(key).ok_or(HookError::NotFound)?;
    tracing::debug!("Removed import hook '{}'", entry.name);
    Ok(())
}

#[cfg(test)]
pub fn is_import_hook_enabled(key: ImportHookKey) -> bool {
    IMPORT_HOOKS
        .read()
        .get(key)
        .map(|e| e.enabled)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NT_OFFSET: usize = 0x80;
    const IMPORTS_RVA: usize = 0x200;
    const THUNKS_RVA: usize = 0x300;

    /// A minimal mapped image importing two functions from each of two
    /// modules. Backed by `u64`s for pointer alignment.
    struct FakeImage {
        words: Vec<u64>,
    }

    impl FakeImage {
        fn new(first: (&str, [usize; 2]), second: (&str, [usize; 2])) -> Self {
            let mut image = Self {
                words: vec![0u64; 0x1000 / 8],
            };
            image.put_u16(0, DOS_MAGIC);
            image.put_u32(0x3C, NT_OFFSET as u32);
            image.put_u32(NT_OFFSET, NT_SIGNATURE);
            image.put_u16(NT_OFFSET + OPTIONAL_HEADER_OFFSET, NATIVE_MAGIC);
            image.put_u32(
                NT_OFFSET + OPTIONAL_HEADER_OFFSET + IMPORT_DIRECTORY_OFFSET,
                IMPORTS_RVA as u32,
            );

            for (index, (module, functions)) in [first, second].into_iter().enumerate() {
                let descriptor = IMPORTS_RVA + index * DESCRIPTOR_SIZE;
                let name_rva = 0x280 + index * 0x20;
                let thunk_rva = THUNKS_RVA + index * 0x20;

                image.put_u32(descriptor, thunk_rva as u32);
                image.put_u32(descriptor + 12, name_rva as u32);
                image.put_u32(descriptor + 16, thunk_rva as u32);
                image.bytes_mut()[name_rva..name_rva + module.len()]
                    .copy_from_slice(module.as_bytes());
                for (slot, function) in functions.into_iter().enumerate() {
                    image.put_usize(thunk_rva + slot * 8, function);
                }
            }
            image
        }

        fn bytes_mut(&mut self) -> &mut [u8] {
            unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, 0x1000) }
        }

        fn put_u16(&mut self, offset: usize, value: u16) {
            self.bytes_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }

        fn put_u32(&mut self, offset: usize, value: u32) {
            self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }

        fn put_usize(&mut self, offset: usize, value: usize) {
            self.bytes_mut()[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        }

        fn base(&self) -> *const u8 {
            self.words.as_ptr() as *const u8
        }

        fn slot(&self, offset: usize) -> usize {
            unsafe { (self.base().add(offset) as *const usize).read() }
        }
    }

    fn registry_image() -> FakeImage {
        FakeImage::new(
            ("KERNEL32.dll", [0x1111, 0x2222]),
            ("ADVAPI32.dll", [0x3333, 0x4444]),
        )
    }

    #[test]
    fn test_finds_slot_case_insensitively() {
        let image = registry_image();
        let slot = unsafe {
            find_import_slot(image.base(), "advapi32.dll", 0x4444 as *const c_void).unwrap()
        };
        assert_eq!(slot as usize - image.base() as usize, THUNKS_RVA + 0x20 + 8);
    }

    #[test]
    fn test_same_pointer_under_other_module_is_not_matched() {
        let image = registry_image();
        let result =
            unsafe { find_import_slot(image.base(), "advapi32.dll", 0x1111 as *const c_void) };
        assert!(matches!(result, Err(HookError::ImportNotFound { .. })));
    }

    #[test]
    fn test_rejects_non_image() {
        let zeros = [0u64; 64];
        let result = unsafe {
            find_import_slot(zeros.as_ptr() as *const u8, "advapi32.dll", std::ptr::null())
        };
        assert!(matches!(result, Err(HookError::MalformedImage(_))));
    }

    #[test]
    fn test_patch_enable_disable_restores_slot() {
        let image = registry_image();
        let slot_offset = THUNKS_RVA + 0x20;

        let (key, original) = unsafe {
            create_import_hook(
                "RegQueryValueExW",
                image.base(),
                "ADVAPI32.DLL",
                0x3333 as *const (),
                0x9999 as *const (),
            )
            .unwrap()
        };
        assert_eq!(original as usize, 0x3333);
        assert_eq!(image.slot(slot_offset), 0x3333);

        enable_import_hook(key).unwrap();
        assert!(is_import_hook_enabled(key));
        assert_eq!(image.slot(slot_offset), 0x9999);
        assert_eq!(image.slot(slot_offset + 8), 0x4444);

        disable_import_hook(key).unwrap();
        assert_eq!(image.slot(slot_offset), 0x3333);

        enable_import_hook(key).unwrap();
        remove_import_hook(key).unwrap();
        assert_eq!(image.slot(slot_offset), 0x3333);
        assert!(matches!(enable_import_hook(key), Err(HookError::NotFound)));
    }

    #[test]
    fn test_missing_import_names_the_function() {
        let image = registry_image();
        let result = unsafe {
            create_import_hook(
                "RegQueryValueExW",
                image.base(),
                "advapi32.dll",
                0x7777 as *const (),
                0x9999 as *const (),
            )
        };
        match result {
            Err(HookError::ImportNotFound { function, .. }) => {
                assert_eq!(function, "RegQueryValueExW")
            }
            other => panic!("unexpected result: {:?}", other.map(|(_, p)| p)),
        }
    }
}
