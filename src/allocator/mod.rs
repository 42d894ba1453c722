//! Allocators - one capability set, three strategies
//!
//! Design: Callers depend on the [`Allocator`] trait only:
//! 1. [`GeneralAllocator`] - platform heap, over-alignment, large-object path
//! 2. [`Arena`] - one reserved region, bump cursor, bulk reset
//! 3. [`ScopedAllocator`] - stack discipline over an arena, cleanup on exit
//!
//! Every variant implements all five operations, even when some are no-ops.
//! No allocator locks internally; one thread at a time per allocator.

mod arena;
mod general;
mod large;
mod scoped;


pub use arena::Arena;
pub use general::{general, GeneralAllocator};
pub use large::{allocate_pages, free_pages};
pub use scoped::ScopedAllocator;

use core::ptr::NonNull;
use crate::error::{AllocError, Result};

/// Natural alignment of the platform heap (2 x pointer width)
pub const MIN_ALIGN: usize = 2 * core::mem::size_of::<usize>();

/// Page-granular block from [`Allocator::allocate_large`]
///
/// `size` is the actual size handed out, which may exceed the request. It
/// must be passed back unchanged to [`Allocator::free_large`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargeBlock {
    pub ptr: NonNull<u8>,
    pub size: usize,
}

/// Allocation capability set shared by every allocator
///
/// Methods take `&self`: the process-wide allocator is shared, and scoped
/// allocators share their arena.
pub trait Allocator {
    /// Allocate `size` bytes aligned to `align`
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>>;

    /// Resize a block, preserving `min(old_size, new_size)` bytes
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this allocator of `old_size`
    /// bytes allocated with `align`. On success the old pointer is dead
    /// unless it is returned again.
    unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>>;

    /// Release a block (null is ignored)
    ///
    /// # Safety
    /// `ptr` must be null or a live block of `size` bytes from this allocator.
    unsafe fn free(&self, ptr: *mut u8, size: usize);

    /// Allocate whole pages, reporting the actual size handed out
    fn allocate_large(&self, size: usize, align: usize) -> Result<LargeBlock>;

    /// Release a block from [`Allocator::allocate_large`]
    ///
    /// # Safety
    /// `block` must be exactly as returned by `allocate_large` on this
    /// allocator and not yet released.
    unsafe fn free_large(&self, block: LargeBlock);
}

/// Normalize a requested alignment to a power of two
///
/// Zero means "no requirement". Other values round up; overflow of the
/// rounding is a [`AllocError::BadAlignment`].
#[inline]
pub fn normalize_align(align: usize) -> Result<usize> {
    if align <= 1 {
        return Ok(1);
    }
    align
        .checked_next_power_of_two()
        .ok_or(AllocError::bad_alignment(align))
}

/// Align address upward to next multiple of `align` (power of two)
#[inline]
pub(crate) fn align_up(addr: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two(), "alignment must be power of 2");
    addr.checked_add(align - 1).map(|a| a & !(align - 1))
}

/// Align address downward to a multiple of `align` (power of two)
#[inline]
pub(crate) const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}
