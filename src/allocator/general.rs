//! General allocator - platform heap with alignment and tracking
//!
//! Design: Two paths split on alignment:
//! 1. Fast path (align <= MIN_ALIGN): plain `malloc`/`realloc`/`free`
//! 2. Aligned path: `posix_memalign` (unix) / `_aligned_malloc` (windows);
//!    shrinking stays in place, growing moves
//!
//! With guard pages enabled every object gets its own mapping instead, flush
//! against an inaccessible page. Large objects always bypass the heap.
//!
//! Live bytes are counted atomically so another thread can sample usage.
//! Successful allocations are reported to the process-wide tracker, which
//! ignores them unless tracking is active. Reallocation is tracked as a
//! free of the old block followed by an allocation of the new one.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};
use crate::config;
use crate::error::{AllocError, Result};
use crate::logging::{log_allocation, log_deallocation};
use crate::poison::{poison, PoisonState};
use crate::tracking::{self, CallSite};
use super::large::{self, guarded_allocate, guarded_free};
use super::{normalize_align, Allocator, LargeBlock, MIN_ALIGN};

/// Process-wide instance
static GENERAL: GeneralAllocator = GeneralAllocator::new();

/// The process-wide general allocator
#[inline]
pub fn general() -> &'static GeneralAllocator {
    &GENERAL
}

/// Platform heap allocator
///
/// Usable through [`Allocator`] (logged, call sites captured) or as the
/// global allocator through [`GlobalAlloc`] (silent, call sites unknown).
#[derive(Debug)]
pub struct GeneralAllocator {
    usage: AtomicUsize,
}

impl GeneralAllocator {
    pub const fn new() -> Self {
        Self {
            usage: AtomicUsize::new(0),
        }
    }

    /// Live bytes handed out by this instance
    #[inline]
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    pub(crate) fn allocate_at(&self, size: usize, align: usize, site: CallSite) -> Result<NonNull<u8>> {
        let align = normalize_align(align)?;

        let ptr = if config::get().guard_pages {
            guarded_allocate(size, align)?
        } else if align <= MIN_ALIGN {
            heap::alloc(size).ok_or(AllocError::out_of_memory(size, align))?
        } else {
            heap::alloc_aligned(size, align)?
        };

        unsafe { poison(ptr.as_ptr(), size, PoisonState::Uninitialized) };
        self.usage.fetch_add(size, Ordering::Relaxed);
        tracking::record_allocation(ptr.as_ptr() as usize, size, site);
        Ok(ptr)
    }

    pub(crate) unsafe fn reallocate_at(
        &self,
        ptr: *mut u8,
        old_size: usize,
        new_size: usize,
        align: usize,
        site: CallSite,
    ) -> Result<NonNull<u8>> {
        let Some(old) = NonNull::new(ptr) else {
            return self.allocate_at(new_size, align, site);
        };
        let align = normalize_align(align)?;
        let oom = AllocError::out_of_memory(new_size, align);

        let resized = if config::get().guard_pages {
            let fresh = guarded_allocate(new_size, align)?;
            ptr::copy_nonoverlapping(ptr, fresh.as_ptr(), old_size.min(new_size));
            guarded_free(old, old_size);
            fresh
        } else if align <= MIN_ALIGN {
            heap::realloc(ptr, old_size, new_size).ok_or(oom)?
        } else if new_size <= old_size {
            poison(ptr.add(new_size), old_size - new_size, PoisonState::Freed);
            old
        } else {
            let fresh = heap::alloc_aligned(new_size, align)?;
            ptr::copy_nonoverlapping(ptr, fresh.as_ptr(), old_size);
            heap::free(ptr);
            fresh
        };

        if new_size > old_size {
            poison(resized.as_ptr().add(old_size), new_size - old_size, PoisonState::Uninitialized);
        }

        // One atomic step so concurrent readers never see both sizes counted
        if new_size >= old_size {
            self.usage.fetch_add(new_size - old_size, Ordering::Relaxed);
        } else {
            self.usage.fetch_sub(old_size - new_size, Ordering::Relaxed);
        }
        tracking::record_free(ptr as usize);
        tracking::record_allocation(resized.as_ptr() as usize, new_size, site);
        Ok(resized)
    }

    pub(crate) unsafe fn free_at(&self, ptr: *mut u8, size: usize) {
        let Some(block) = NonNull::new(ptr) else {
            return;
        };

        tracking::record_free(ptr as usize);
        self.usage.fetch_sub(size, Ordering::Relaxed);

        if config::get().guard_pages {
            guarded_free(block, size);
        } else {
            poison(ptr, size, PoisonState::Freed);
            heap::free(ptr);
        }
    }
}

impl Default for GeneralAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for GeneralAllocator {
    #[track_caller]
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        let ptr = self.allocate_at(size, align, CallSite::caller())?;
        log_allocation("general", size, align, ptr.as_ptr());
        Ok(ptr)
    }

    #[track_caller]
    unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        let resized = self.reallocate_at(ptr, old_size, new_size, align, CallSite::caller())?;
        if !ptr.is_null() {
            log_deallocation("general", old_size, ptr);
        }
        log_allocation("general", new_size, align, resized.as_ptr());
        Ok(resized)
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        if !ptr.is_null() {
            self.free_at(ptr, size);
            log_deallocation("general", size, ptr);
        }
    }

    #[track_caller]
    fn allocate_large(&self, size: usize, align: usize) -> Result<LargeBlock> {
        let block = large::allocate_pages(size, align)?;
        self.usage.fetch_add(block.size, Ordering::Relaxed);
        tracking::record_allocation(block.ptr.as_ptr() as usize, block.size, CallSite::caller());
        Ok(block)
    }

    unsafe fn free_large(&self, block: LargeBlock) {
        tracking::record_free(block.ptr.as_ptr() as usize);
        self.usage.fetch_sub(block.size, Ordering::Relaxed);
        large::free_pages(block);
        log_deallocation("large", block.size, block.ptr.as_ptr());
    }
}

// Nothing on this path logs: the subscriber may allocate.
unsafe impl GlobalAlloc for GeneralAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate_at(layout.size(), layout.align(), CallSite::Unknown)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.free_at(ptr, layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.reallocate_at(ptr, layout.size(), new_size, layout.align(), CallSite::Unknown)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg(unix)]
mod heap {
    use core::ptr::{self, NonNull};
    use crate::error::{AllocError, Result};

    #[inline]
    pub fn alloc(size: usize) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { libc::malloc(size.max(1)) } as *mut u8)
    }

    pub fn alloc_aligned(size: usize, align: usize) -> Result<NonNull<u8>> {
        let mut out = ptr::null_mut();
        match unsafe { libc::posix_memalign(&mut out, align, size.max(1)) } {
            0 => NonNull::new(out as *mut u8).ok_or(AllocError::out_of_memory(size, align)),
            libc::EINVAL => Err(AllocError::bad_alignment(align)),
            _ => Err(AllocError::out_of_memory(size, align)),
        }
    }

    #[inline]
    pub unsafe fn realloc(ptr: *mut u8, _old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        NonNull::new(libc::realloc(ptr as *mut libc::c_void, new_size.max(1)) as *mut u8)
    }

    #[inline]
    pub unsafe fn free(ptr: *mut u8) {
        libc::free(ptr as *mut libc::c_void)
    }
}

// Every block comes from `_aligned_malloc`, so one free covers both paths.
#[cfg(windows)]
mod heap {
    use core::ptr::NonNull;
    use crate::error::{AllocError, Result};
    use super::MIN_ALIGN;

    #[inline]
    pub fn alloc(size: usize) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { libc::aligned_malloc(size.max(1), MIN_ALIGN) } as *mut u8)
    }

    pub fn alloc_aligned(size: usize, align: usize) -> Result<NonNull<u8>> {
        NonNull::new(unsafe { libc::aligned_malloc(size.max(1), align) } as *mut u8)
            .ok_or(AllocError::out_of_memory(size, align))
    }

    pub unsafe fn realloc(ptr: *mut u8, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        let fresh = alloc(new_size)?;
        core::ptr::copy_nonoverlapping(ptr, fresh.as_ptr(), old_size.min(new_size));
        free(ptr);
        Some(fresh)
    }

    #[inline]
    pub unsafe fn free(ptr: *mut u8) {
        libc::aligned_free(ptr as *mut libc::c_void)
    }
}
