//! OS memory primitives - anonymous page mappings
//!
//! Design: Thin wrappers over `mmap`/`munmap`/`mprotect` (unix) and
//! `VirtualAlloc`/`VirtualFree`/`VirtualProtect` (windows). Arenas, the
//! large-object path, guard pages and the tracker table all sit on these.
//! Nothing here touches the platform heap, so the tracker can use it
//! without recursing into the allocator it observes.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use crate::error::{AllocError, Result};

/// Cached page size (0 = not yet queried)
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Page access after [`protect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    NoAccess,
    ReadWrite,
}

/// OS page size in bytes
#[inline]
pub fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = sys::query_page_size();
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Round `size` up to a whole number of pages
#[inline]
pub fn round_to_pages(size: usize) -> Option<usize> {
    let page = page_size();
    size.checked_add(page - 1).map(|s| s & !(page - 1))
}

/// Map `len` bytes of zeroed, read-write anonymous memory
///
/// The result is page-aligned. `len` must be non-zero.
pub fn map(len: usize) -> Result<NonNull<u8>> {
    debug_assert!(len > 0, "empty mapping");
    sys::map(len).ok_or(AllocError::out_of_memory(len, page_size()))
}

/// Release a mapping obtained from [`map`]
///
/// # Safety
/// `ptr`/`len` must describe exactly one live mapping from [`map`].
pub unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
    sys::unmap(ptr, len)
}

/// Release part of a mapping (unix only)
///
/// # Safety
/// The range must be page-aligned and lie inside a live mapping.
#[cfg(unix)]
pub unsafe fn unmap_range(ptr: NonNull<u8>, len: usize) {
    if len > 0 {
        sys::unmap(ptr, len)
    }
}

/// Change access to whole pages
///
/// # Safety
/// The range must be page-aligned and lie inside a live mapping.
pub unsafe fn protect(ptr: NonNull<u8>, len: usize, protection: Protection) -> bool {
    sys::protect(ptr, len, protection)
}

#[cfg(unix)]
mod sys {
    use super::Protection;
    use core::ptr::{self, NonNull};

    pub fn query_page_size() -> usize {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size < 1 {
            4096
        } else {
            size as usize
        }
    }

    pub fn map(len: usize) -> Option<NonNull<u8>> {
        let memory = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if memory == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(memory as *mut u8)
        }
    }

    pub unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
        libc::munmap(ptr.as_ptr() as *mut libc::c_void, len);
    }

    pub unsafe fn protect(ptr: NonNull<u8>, len: usize, protection: Protection) -> bool {
        let prot = match protection {
            Protection::NoAccess => libc::PROT_NONE,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };
        libc::mprotect(ptr.as_ptr() as *mut libc::c_void, len, prot) == 0
    }
}

#[cfg(windows)]
mod sys {
    use super::Protection;
    use core::ptr::{self, NonNull};
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

    pub fn query_page_size() -> usize {
        let mut info: SYSTEM_INFO = unsafe { core::mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        (info.dwPageSize as usize).max(1)
    }

    pub fn map(len: usize) -> Option<NonNull<u8>> {
        let memory = unsafe {
            VirtualAlloc(ptr::null_mut(), len, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE)
        };
        NonNull::new(memory as *mut u8)
    }

    pub unsafe fn unmap(ptr: NonNull<u8>, _len: usize) {
        // MEM_RELEASE frees the whole reservation and requires size 0
        VirtualFree(ptr.as_ptr() as _, 0, MEM_RELEASE);
    }

    pub unsafe fn protect(ptr: NonNull<u8>, len: usize, protection: Protection) -> bool {
        let prot = match protection {
            Protection::NoAccess => PAGE_NOACCESS,
            Protection::ReadWrite => PAGE_READWRITE,
        };
        let mut old = 0;
        VirtualProtect(ptr.as_ptr() as _, len, prot, &mut old) != 0
    }
}
