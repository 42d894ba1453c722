//! Memory poisoning - recognizable fill patterns for diagnostic builds
//!
//! Memory in a known logical state is overwritten with that state's byte so
//! a read of padding, of never-written storage or of released storage shows
//! up as an obvious pattern in a debugger or a failed assertion.

use crate::config;

/// Logical state of a poisoned byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoisonState {
    /// Padding or reserve that was never handed out
    Unallocated = 0xFD,
    /// Handed out, not yet written by the owner
    Uninitialized = 0xCD,
    /// Returned to its allocator
    Freed = 0xDD,
}

impl PoisonState {
    #[inline]
    pub const fn byte(self) -> u8 {
        self as u8
    }
}

/// Whether poisoning is active for this process
#[inline]
pub fn enabled() -> bool {
    config::get().poison
}

/// Fill `len` bytes at `ptr` with the pattern for `state` (if enabled)
///
/// # Safety
/// `ptr..ptr + len` must be writable.
#[inline]
pub unsafe fn poison(ptr: *mut u8, len: usize, state: PoisonState) {
    if len > 0 && enabled() {
        core::ptr::write_bytes(ptr, state.byte(), len);
    }
}

/// Check that every byte in the range carries the pattern for `state`
///
/// # Safety
/// `ptr..ptr + len` must be readable.
pub unsafe fn is_poisoned(ptr: *const u8, len: usize, state: PoisonState) -> bool {
    core::slice::from_raw_parts(ptr, len)
        .iter()
        .all(|&b| b == state.byte())
}
