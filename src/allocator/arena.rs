//! Arena - one reserved region, bump cursor, bulk reclamation
//!
//! Design: A single OS mapping reserved up front; allocation advances a
//! cursor and nothing is ever freed individually. Memory returns only by
//! rewinding the cursor with [`Arena::reset`], which is what
//! [`ScopedAllocator`](super::ScopedAllocator) does on teardown.
//!
//! Exhaustion is an error, never a fallback to the general heap: it means
//! the arena was sized wrong.
//!
//! Invariant: `begin <= cursor <= end` at every observable point.

use core::cell::Cell;
use core::ptr::{self, NonNull};
use crate::config;
use crate::error::{AllocError, Result};
use crate::logging::{log_arena_created, log_arena_destroyed, log_arena_reset, warn};
use crate::os::{self, Protection};
use crate::poison::{poison, PoisonState};
use super::{align_up, normalize_align, Allocator, LargeBlock, ScopedAllocator};

/// Bump allocator over one contiguous reserved region `[begin, end)`
///
/// Shared by reference: every scoped allocator built on an arena borrows
/// it, so the cursor lives in a `Cell`. Single-threaded by construction.
#[derive(Debug)]
pub struct Arena {
    begin: usize,
    end: usize,
    cursor: Cell<usize>,
    /// Scoped allocators currently open on this arena
    scopes: Cell<usize>,
    /// OS mapping backing the region (`None` for an empty arena)
    mapping: Option<(NonNull<u8>, usize)>,
}

// Safety: the arena exclusively owns its mapping; moving it between threads
// moves that ownership. It is not Sync (Cell).
unsafe impl Send for Arena {}

impl Arena {
    /// Reserve a region of exactly `size` usable bytes
    ///
    /// The mapping itself is page-rounded (plus a trailing guard page in
    /// hardened mode) but allocation never goes past `begin + size`.
    /// A zero size yields an empty arena that owns no mapping.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            let addr = NonNull::<u8>::dangling().as_ptr() as usize;
            return Ok(Self {
                begin: addr,
                end: addr,
                cursor: Cell::new(addr),
                scopes: Cell::new(0),
                mapping: None,
            });
        }

        let oom = AllocError::out_of_memory(size, 1);
        let reserved = os::round_to_pages(size).ok_or(oom)?;
        let guard = if config::get().guard_pages { os::page_size() } else { 0 };
        let len = reserved.checked_add(guard).ok_or(oom)?;
        let base = os::map(len).map_err(|_| oom)?;

        if guard > 0 {
            let guard_page = unsafe { NonNull::new_unchecked(base.as_ptr().add(reserved)) };
            if !unsafe { os::protect(guard_page, guard, Protection::NoAccess) } {
                warn!(address = ?guard_page.as_ptr(), "failed to protect arena guard page");
            }
        }

        log_arena_created(size, base.as_ptr());

        let begin = base.as_ptr() as usize;
        Ok(Self {
            begin,
            end: begin + size,
            cursor: Cell::new(begin),
            scopes: Cell::new(0),
            mapping: Some((base, len)),
        })
    }

    /// Start of the region
    #[inline]
    pub fn begin(&self) -> *mut u8 {
        self.begin as *mut u8
    }

    /// One past the last usable byte
    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.end as *mut u8
    }

    /// Next free byte
    #[inline]
    pub fn cursor(&self) -> *mut u8 {
        self.cursor.get() as *mut u8
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.cursor.get() - self.begin
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.end - self.cursor.get()
    }

    /// Whether `ptr` lies inside `[begin, end)`
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        (self.begin..self.end).contains(&(ptr as usize))
    }

    /// Open a scoped allocator at the current cursor
    pub fn scope(&self) -> ScopedAllocator<'_> {
        ScopedAllocator::new(self)
    }

    /// Number of scoped allocators currently open on this arena
    #[inline]
    pub fn scope_depth(&self) -> usize {
        self.scopes.get()
    }

    /// Register a new innermost scope, returning its nesting depth
    #[inline]
    pub(super) fn open_scope(&self) -> usize {
        let depth = self.scopes.get();
        self.scopes.set(depth + 1);
        depth
    }

    #[inline]
    pub(super) fn close_scope(&self) {
        self.scopes.set(self.scopes.get().saturating_sub(1));
    }

    /// Bump-allocate `size` bytes aligned to `align`
    ///
    /// Skipped padding is poisoned as unallocated and the returned bytes as
    /// uninitialized.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        let align = normalize_align(align)?;
        let oom = AllocError::out_of_memory(size, align);

        let cursor = self.cursor.get();
        let start = align_up(cursor, align).ok_or(oom)?;
        let next = start.checked_add(size).ok_or(oom)?;
        if next > self.end {
            return Err(oom);
        }

        unsafe {
            poison(cursor as *mut u8, start - cursor, PoisonState::Unallocated);
            poison(start as *mut u8, size, PoisonState::Uninitialized);
        }

        self.cursor.set(next);
        Ok(unsafe { NonNull::new_unchecked(start as *mut u8) })
    }

    /// Rewind the cursor to `new_cursor`, releasing everything above it
    ///
    /// The vacated range is poisoned as freed. A target outside
    /// `[begin, cursor]` is fatal.
    ///
    /// # Safety
    /// Nothing allocated at or above `new_cursor` may be used afterwards.
    pub unsafe fn reset(&self, new_cursor: *mut u8) {
        let requested = new_cursor as usize;
        let cursor = self.cursor.get();
        if requested < self.begin || requested > cursor {
            crate::fatal!(
                "arena reset to {:#x} outside [{:#x}, {:#x}]",
                requested,
                self.begin,
                cursor
            );
        }

        poison(new_cursor, cursor - requested, PoisonState::Freed);
        self.cursor.set(requested);
        log_arena_reset(cursor - requested, new_cursor);
    }

    /// Rewind to `begin`
    ///
    /// # Safety
    /// Nothing allocated from this arena may be used afterwards.
    pub unsafe fn clear(&self) {
        self.reset(self.begin())
    }
}

impl Allocator for Arena {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        Arena::allocate(self, size, align)
    }

    unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>> {
        let Some(old) = NonNull::new(ptr) else {
            return Arena::allocate(self, new_size, align);
        };

        let align = normalize_align(align)?;
        let addr = ptr as usize;
        let aligned = addr % align == 0;

        // Most recent allocation: move the cursor instead of copying
        if aligned && addr.checked_add(old_size) == Some(self.cursor.get()) {
            let next = addr
                .checked_add(new_size)
                .filter(|&next| next <= self.end)
                .ok_or(AllocError::out_of_memory(new_size, align))?;

            if new_size > old_size {
                poison(ptr.add(old_size), new_size - old_size, PoisonState::Uninitialized);
            } else {
                poison(ptr.add(new_size), old_size - new_size, PoisonState::Freed);
            }
            self.cursor.set(next);
            return Ok(old);
        }

        if aligned && new_size <= old_size {
            return Ok(old);
        }

        let fresh = Arena::allocate(self, new_size, align)?;
        ptr::copy_nonoverlapping(ptr, fresh.as_ptr(), old_size.min(new_size));
        Ok(fresh)
    }

    #[inline]
    unsafe fn free(&self, _ptr: *mut u8, _size: usize) {}

    /// Same as `allocate`; the arena does no page rounding of its own
    fn allocate_large(&self, size: usize, align: usize) -> Result<LargeBlock> {
        let ptr = Arena::allocate(self, size, align)?;
        Ok(LargeBlock { ptr, size })
    }

    #[inline]
    unsafe fn free_large(&self, _block: LargeBlock) {}
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Some((base, len)) = self.mapping.take() {
            log_arena_destroyed(self.capacity(), self.used());
            unsafe { os::unmap(base, len) };
        }
    }
}
