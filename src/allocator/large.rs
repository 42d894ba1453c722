//! Large allocation path - whole OS pages, bypassing the heap
//!
//! Requests are rounded up to a whole number of pages and the actual size is
//! reported back; the caller returns it unchanged on free. With guard pages
//! enabled every mapping carries one extra inaccessible page at its end.
//!
//! The guarded layout is also how the hardened general allocator serves
//! ordinary requests: the object sits flush against the guard page so an
//! overrun faults immediately, and free unmaps the lot so a stale access
//! faults too.

use core::ptr::NonNull;
use crate::config;
use crate::error::{AllocError, Result};
use crate::logging::{log_large_mapping, warn};
use crate::os::{self, Protection};
use super::{align_down, normalize_align, LargeBlock};

#[inline]
fn guard_len() -> usize {
    if config::get().guard_pages {
        os::page_size()
    } else {
        0
    }
}

/// Make the trailing page of a mapping inaccessible
unsafe fn arm_guard(guard: NonNull<u8>) {
    if !os::protect(guard, os::page_size(), Protection::NoAccess) {
        warn!(address = ?guard.as_ptr(), "failed to protect guard page");
    }
}

/// Map whole pages for `size` bytes aligned to `align`
pub fn allocate_pages(size: usize, align: usize) -> Result<LargeBlock> {
    let align = normalize_align(align)?;
    let page = os::page_size();
    let oom = AllocError::out_of_memory(size, align);

    let actual = os::round_to_pages(size.max(1)).ok_or(oom)?;
    let guard = guard_len();
    let len = actual.checked_add(guard).ok_or(oom)?;

    let ptr = if align <= page {
        os::map(len).map_err(|_| oom)?
    } else {
        map_over_aligned(len, align, oom)?
    };

    if guard > 0 {
        unsafe { arm_guard(NonNull::new_unchecked(ptr.as_ptr().add(actual))) };
    }

    log_large_mapping(size, actual, ptr.as_ptr());
    Ok(LargeBlock { ptr, size: actual })
}

/// Over-map and trim so the block starts on an `align` boundary
#[cfg(unix)]
fn map_over_aligned(len: usize, align: usize, oom: AllocError) -> Result<NonNull<u8>> {
    let span = len.checked_add(align - os::page_size()).ok_or(oom)?;
    let raw = os::map(span).map_err(|_| oom)?;

    let raw_addr = raw.as_ptr() as usize;
    let start = super::align_up(raw_addr, align).ok_or(oom)?;
    let head = start - raw_addr;
    let tail = span - head - len;

    unsafe {
        let start = NonNull::new_unchecked(start as *mut u8);
        os::unmap_range(raw, head);
        os::unmap_range(NonNull::new_unchecked(start.as_ptr().add(len)), tail);
        Ok(start)
    }
}

/// Partial release is not available, so alignment above a page is refused
#[cfg(not(unix))]
fn map_over_aligned(_len: usize, align: usize, _oom: AllocError) -> Result<NonNull<u8>> {
    Err(AllocError::bad_alignment(align))
}

/// Unmap a block from [`allocate_pages`]
///
/// # Safety
/// `block` must be exactly as returned by [`allocate_pages`] and live.
pub unsafe fn free_pages(block: LargeBlock) {
    os::unmap(block.ptr, block.size + guard_len());
}

/// Map a guarded single-object block (hardened general allocation)
pub(crate) fn guarded_allocate(size: usize, align: usize) -> Result<NonNull<u8>> {
    let page = os::page_size();
    if align > page {
        return Err(AllocError::bad_alignment(align));
    }

    let oom = AllocError::out_of_memory(size, align);
    let data = os::round_to_pages(size).ok_or(oom)?;
    let len = data.checked_add(page).ok_or(oom)?;
    let base = os::map(len).map_err(|_| oom)?;

    unsafe {
        let guard = NonNull::new_unchecked(base.as_ptr().add(data));
        arm_guard(guard);

        // Flush against the guard page; stays inside the first data page
        let addr = align_down(guard.as_ptr() as usize - size, align);
        Ok(NonNull::new_unchecked(addr as *mut u8))
    }
}

/// Unmap a block from [`guarded_allocate`]
///
/// # Safety
/// `ptr` must come from [`guarded_allocate`] with the same `size`.
pub(crate) unsafe fn guarded_free(ptr: NonNull<u8>, size: usize) {
    let page = os::page_size();
    let data = os::round_to_pages(size).unwrap_or(0);
    let base = align_down(ptr.as_ptr() as usize, page);
    os::unmap(NonNull::new_unchecked(base as *mut u8), data + page);
}
