//! Inline function detours for x86_64
//!
//! The first instructions of the target are relocated into a block near the
//! target (using iced-x86's block encoder so rip-relative operands and
//! branches keep pointing at the same absolute addresses), followed by an
//! absolute jump back into the rest of the function. Enabling a detour
//! overwrites the first five bytes of the target with a `jmp rel32` to a
//! relay, which holds an absolute jump to the replacement.
//!
//! The five patched bytes must sit inside one aligned 8-byte word. They are
//! swapped in with a single atomic store of that word, so a thread running
//! through the prologue sees either the old bytes or the new ones.
//!
//! Block layout:
//!
//! ```text
//! +0   relay:      jmp [rip+0] ; dq detour
//! +16  trampoline: <relocated prologue> ; jmp [rip+0] ; dq target+consumed
//! ```

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Decoder, DecoderOptions, FlowControl, InstructionBlock,
};
use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use super::trampoline;

new_key_type! {
    /// Handle for an inline detour
    pub struct InlineHookKey;
}

/// Error type for intercept operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Failed to create detour: {0}")]
    DetourCreation(String),

    #[error("Failed to enable hook: {0}")]
    EnableFailed(String),

    #[error("Failed to disable hook: {0}")]
    DisableFailed(String),

    #[error("Hook not found")]
    NotFound,

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    #[error("Invalid address: {0:x}")]
    InvalidAddress(usize),

    #[error("Instruction relocation failed: {0}")]
    RelocationFailed(String),

    #[error("Import {function} from {module} not referenced by the image")]
    ImportNotFound { module: String, function: String },

    #[error("Malformed image: {0}")]
    MalformedImage(&'static str),

    #[error("Not supported on this platform: {0}")]
    Unsupported(&'static str),
}

/// Length of `jmp rel32`
const PATCH_LEN: usize = 5;

/// Length of `jmp qword ptr [rip+0]` followed by the 8-byte destination
const ABS_JMP_LEN: usize = 14;

/// Trampoline offset inside a block
const TRAMPOLINE_OFFSET: usize = 16;

/// Bytes decoded from the target when relocating its prologue
const PROLOGUE_WINDOW: usize = 32;

/// Size of a relay + trampoline block
const BLOCK_SIZE: usize = 96;

/// `jmp qword ptr [rip+0]` with the destination stored right after it
pub(crate) fn abs_jump(destination: u64) -> [u8; ABS_JMP_LEN] {
    let mut code = [0u8; ABS_JMP_LEN];
    code[..6].copy_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&destination.to_le_bytes());
    code
}

/// `jmp rel32` located at `from`, or `None` if `to` is out of reach
pub(crate) fn rel_jump(from: usize, to: usize) -> Option<[u8; PATCH_LEN]> {
    let next = from.wrapping_add(PATCH_LEN) as i64;
    let displacement = i32::try_from((to as i64).wrapping_sub(next)).ok()?;

    let mut code = [0u8; PATCH_LEN];
    code[0] = 0xE9;
    code[1..].copy_from_slice(&displacement.to_le_bytes());
    Some(code)
}

/// Prologue instructions re-encoded for a new address
pub(crate) struct Relocated {
    /// Encoded instructions, valid at the destination address
    pub code: Vec<u8>,
    /// Number of source bytes the instructions covered
    pub consumed: usize,
}

/// Decode whole instructions from `code` until at least `min_len` bytes are
/// covered, then re-encode them to run at `dest_ip`.
pub(crate) fn relocate_prologue(
    code: &[u8],
    source_ip: u64,
    dest_ip: u64,
    min_len: usize,
) -> Result<Relocated, HookError> {
    let mut decoder = Decoder::with_ip(64, code, source_ip, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut consumed = 0;

    while consumed < min_len {
        if !decoder.can_decode() {
            return Err(HookError::RelocationFailed("prologue truncated".into()));
        }

        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(HookError::RelocationFailed(format!(
                "invalid instruction at {:x}",
                instruction.ip()
            )));
        }

        consumed += instruction.len();
        let terminal = matches!(
            instruction.flow_control(),
            FlowControl::Return | FlowControl::UnconditionalBranch | FlowControl::IndirectBranch
        );
        instructions.push(instruction);

        if terminal && consumed < min_len {
            return Err(HookError::RelocationFailed(
                "function too short to patch".into(),
            ));
        }
    }

    let block = InstructionBlock::new(&instructions, dest_ip);
    let encoded = BlockEncoder::encode(64, block, BlockEncoderOptions::NONE)
        .map_err(|e| HookError::RelocationFailed(e.to_string()))?;

    Ok(Relocated {
        code: encoded.code_buffer,
        consumed,
    })
}

struct InlineHookEntry {
    target: usize,

    /// Bytes overwritten while enabled
    original_bytes: [u8; PATCH_LEN],

    /// `jmp rel32` to the relay
    patch: [u8; PATCH_LEN],

    /// Entry point for calling the original function
    trampoline: *const (),

    enabled: bool,

    name: String,
}

// SAFETY: Entries are only reached through the registry lock
unsafe impl Send for InlineHookEntry {}
unsafe impl Sync for InlineHookEntry {}

static INLINE_HOOKS: LazyLock<RwLock<SlotMap<InlineHookKey, InlineHookEntry>>> =
    LazyLock::new(|| RwLock::new(SlotMap::with_key()));

/// Aligned word holding a patch at `address`, and the patch's offset in it
fn patch_word(address: usize) -> Option<(usize, usize)> {
    let word = address & !7;
    let offset = address - word;
    (offset + PATCH_LEN <= 8).then_some((word, offset))
}

/// `word` with `bytes` placed at `offset`, other bytes unchanged
fn merge_patch(word: u64, offset: usize, bytes: &[u8; PATCH_LEN]) -> u64 {
    let mut raw = word.to_le_bytes();
    raw[offset..offset + PATCH_LEN].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

/// Swap the five bytes at `address` in one atomic store, keeping it executable
unsafe fn write_code(address: usize, bytes: &[u8; PATCH_LEN]) -> Result<(), HookError> {
    let (word, offset) = patch_word(address).ok_or(HookError::InvalidAddress(address))?;

    let _guard = region::protect_with_handle(
        word as *const u8,
        std::mem::size_of::<u64>(),
        region::Protection::READ_WRITE_EXECUTE,
    )
    .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    let cell = AtomicU64::from_ptr(word as *mut u64);
    let mut current = cell.load(Ordering::Acquire);
    loop {
        let next = merge_patch(current, offset, bytes);
        match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return Ok(()),
            Err(actual) => current = actual,
        }
    }
}

/// Bytes readable from `address` within its mapping, capped at the prologue window
fn readable_window(address: usize) -> Result<usize, HookError> {
    let found =
        region::query(address as *const u8).map_err(|_| HookError::InvalidAddress(address))?;
    if !found.protection().contains(region::Protection::READ) {
        return Err(HookError::InvalidAddress(address));
    }
    Ok((found.as_range().end - address).min(PROLOGUE_WINDOW))
}

/// Prepare a detour of `target` to `detour` without enabling it
///
/// # Safety
/// - `target` must point at the first instruction of an x86_64 function
/// - `detour` must be a function with the same signature and ABI
///
/// # Returns
/// A key to manage the detour, and a pointer that calls the original function
pub unsafe fn create_inline_hook(
    name: &str,
    target: *const (),
    detour: *const (),
) -> Result<(InlineHookKey, *const ()), HookError> {
    let target_addr = target as usize;
    if target.is_null() {
        return Err(HookError::InvalidAddress(target_addr));
    }

    if patch_word(target_addr).is_none() {
        return Err(HookError::DetourCreation(format!(
            "patch at {target_addr:x} crosses an 8-byte boundary"
        )));
    }
    let window_len = readable_window(target_addr)?;

    tracing::debug!(
        "Creating inline hook '{}' at {:x} -> {:x}",
        name,
        target_addr,
        detour as usize
    );

    let block = trampoline::alloc_near(target as *const u8, BLOCK_SIZE)
        .ok_or_else(|| HookError::DetourCreation(format!("no code block near {target_addr:x}")))?;
    let block_addr = block.as_ptr() as usize;
    let trampoline_addr = block_addr + TRAMPOLINE_OFFSET;

    let window = std::slice::from_raw_parts(target as *const u8, window_len);
    let relocated = relocate_prologue(
        window,
        target_addr as u64,
        trampoline_addr as u64,
        PATCH_LEN,
    )?;

    if TRAMPOLINE_OFFSET + relocated.code.len() + ABS_JMP_LEN > BLOCK_SIZE {
        return Err(HookError::RelocationFailed(format!(
            "relocated prologue of '{name}' needs {} bytes",
            relocated.code.len()
        )));
    }

    let patch = rel_jump(target_addr, block_addr).ok_or_else(|| {
        HookError::DetourCreation(format!("relay {block_addr:x} out of rel32 reach"))
    })?;

    let relay = abs_jump(detour as u64);
    let resume = abs_jump((target_addr + relocated.consumed) as u64);

    let base = block.as_ptr();
    std::ptr::copy_nonoverlapping(relay.as_ptr(), base, relay.len());
    let tramp = base.add(TRAMPOLINE_OFFSET);
    std::ptr::copy_nonoverlapping(relocated.code.as_ptr(), tramp, relocated.code.len());
    std::ptr::copy_nonoverlapping(
        resume.as_ptr(),
        tramp.add(relocated.code.len()),
        resume.len(),
    );

    let mut original_bytes = [0u8; PATCH_LEN];
    original_bytes.copy_from_slice(&window[..PATCH_LEN]);

    let entry = InlineHookEntry {
        target: target_addr,
        original_bytes,
        patch,
        trampoline: trampoline_addr as *const (),
        enabled: false,
        name: name.to_string(),
    };

    let key = INLINE_HOOKS.write().insert(entry);

    tracing::info!("Created inline hook '{}' at {:x}", name, target_addr);

    Ok((key, trampoline_addr as *const ()))
}

/// Enable an inline detour
pub fn enable_inline_hook(key: InlineHookKey) -> Result<(), HookError> {
    let mut hooks = INLINE_HOOKS.write();
    let entry = hooks.get_mut(key).ok_or(HookError::NotFound)?;

    if entry.enabled {
        return Ok(());
    }

    unsafe { write_code(entry.target, &entry.patch) }
        .map_err(|e| HookError::EnableFailed(e.to_string()))?;

    entry.enabled = true;
    tracing::debug!("Enabled inline hook '{}' at {:x}", entry.name, entry.target);
    Ok(())
}

/// Disable an inline detour (restores the original bytes)
pub fn disable_inline_hook(key: InlineHookKey) -> Result<(), HookError> {
    let mut hooks = INLINE_HOOKS.write();
    let entry = hooks.get_mut(key).ok_or(HookError::NotFound)?;

    if !entry.enabled {
        return Ok(());
    }

    unsafe { write_code(entry.target, &entry.original_bytes) }
        .map_err(|e| HookError::DisableFailed(e.to_string()))?;

    entry.enabled = false;
    tracing::debug!("Disabled inline hook '{}' at {:x}", entry.name, entry.target);
    Ok(())
}

/// Remove an inline detour. Its code block stays mapped, so a thread still
/// running through the trampoline can finish.
pub fn remove_inline_hook(key: InlineHookKey) -> Result<(), HookError> {
    disable_inline_hook(key)?;
    let entry = INLINE_HOOKS.write().remove(key).ok_or(HookError::NotFound)?;

    tracing::debug!("Removed inline hook '{}' at {:x}", entry.name, entry.target);
    Ok(())
}

#[cfg(test)]
pub fn is_inline_hook_enabled(key: InlineHookKey) -> bool {
    INLINE_HOOKS
        .read()
        .get(key)
        .map(|e| e.enabled)
        .unwrap_or(false)
}
