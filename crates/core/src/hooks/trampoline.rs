//! Executable memory for relays and relocated prologues
//!
//! Every inline intercept needs a small block of executable memory within
//! rel32 reach (±2GB) of the patched function, so the 5-byte `jmp` written
//! over the prologue can reach it.

use parking_lot::Mutex;
use std::ptr::NonNull;

/// Page size used for arena allocations
const PAGE_SIZE: usize = 4096;

/// Allocation granularity the near-search steps by
#[cfg(windows)]
const SEARCH_STEP: usize = 0x1_0000;
#[cfg(unix)]
const SEARCH_STEP: usize = PAGE_SIZE * 16;

/// Maximum distance between a block and the function it serves
pub(crate) const MAX_RANGE: usize = 0x7FFF_0000;

/// Blocks are handed out on 16-byte boundaries
const BLOCK_ALIGN: usize = 16;

static ARENA: Mutex<CodeArena> = Mutex::new(CodeArena::new());

struct Page {
    base: usize,
    used: usize,
}

/// Bump allocator over RWX pages, never freed
struct CodeArena {
    pages: Vec<Page>,
}

impl CodeArena {
    const fn new() -> Self {
        Self { pages: Vec::new() }
    }

    fn alloc_near(&mut self, target: usize, size: usize) -> Option<NonNull<u8>> {
        let size = size.next_multiple_of(BLOCK_ALIGN);
        if size > PAGE_SIZE {
            return None;
        }

        let reusable = self.pages.iter_mut().find(|page| {
            distance(page.base, target) < MAX_RANGE - PAGE_SIZE && page.used + size <= PAGE_SIZE
        });

        let page = match reusable {
            Some(page) => page,
            None => {
                let base = map_page_near(target)?;
                self.pages.push(Page { base, used: 0 });
                self.pages.last_mut()?
            }
        };

        let block = page.base + page.used;
        page.used += size;
        NonNull::new(block as *mut u8)
    }
}

fn distance(a: usize, b: usize) -> usize {
    a.abs_diff(b)
}

/// Candidate hint addresses, alternating below and above `target`
fn candidates(target: usize) -> impl Iterator<Item = usize> {
    let aligned = target & !(SEARCH_STEP - 1);
    let steps = MAX_RANGE / SEARCH_STEP;
    (1..steps).flat_map(move |i| {
        let offset = i * SEARCH_STEP;
        [aligned.checked_sub(offset), aligned.checked_add(offset)]
    })
    .flatten()
    .filter(|&hint| hint != 0)
}

#[cfg(unix)]
fn map_page_near(target: usize) -> Option<usize> {
    use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
    use std::num::NonZeroUsize;

    let len = NonZeroUsize::new(PAGE_SIZE)?;
    let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC;

    // A bounded number of probes; the kernel treats the hint as advisory
    for hint in candidates(target).take(512) {
        let mapped =
            unsafe { mmap_anonymous(NonZeroUsize::new(hint), len, prot, MapFlags::MAP_PRIVATE) };

        let Ok(ptr) = mapped else { continue };
        let base = ptr.as_ptr() as usize;

        if distance(base, target) < MAX_RANGE - PAGE_SIZE {
            return Some(base);
        }

        unsafe {
            let _ = munmap(ptr, PAGE_SIZE);
        }
    }

    tracing::error!("No executable page available near {:x}", target);
    None
}

#[cfg(windows)]
fn map_page_near(target: usize) -> Option<usize> {
    use windows::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };

    for hint in candidates(target) {
        let mapped = unsafe {
            VirtualAlloc(
                Some(hint as *const std::ffi::c_void),
                PAGE_SIZE,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };

        if mapped.is_null() {
            continue;
        }

        let base = mapped as usize;
        if distance(base, target) < MAX_RANGE - PAGE_SIZE {
            return Some(base);
        }

        unsafe {
            let _ = VirtualFree(mapped, 0, MEM_RELEASE);
        }
    }

    tracing::error!("No executable page available near {:x}", target);
    None
}

/// Allocate `size` bytes of RWX memory within rel32 reach of `target`
pub fn alloc_near(target: *const u8, size: usize) -> Option<NonNull<u8>> {
    ARENA.lock().alloc_near(target as usize, size)
}
