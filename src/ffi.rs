//! C FFI - general allocator and leak tracking for foreign callers
//!
//! Design: Thin `extern "C"` shims over the process-wide general allocator.
//! Errors come back as null pointers / `false`. Foreign callers pass their
//! own return address (or 0) as the call site, which leak reports symbolize.

use std::io;
use crate::allocator::general;
use crate::logging::warn;
use crate::tracking::{self, CallSite};

fn call_site(caller: usize) -> CallSite {
    if caller == 0 {
        CallSite::Unknown
    } else {
        CallSite::Address(caller)
    }
}

/// Initialize logging from the environment
#[no_mangle]
pub extern "C" fn memcore_init() {
    crate::init();
}

/// Allocate `size` bytes aligned to `align`; null on failure
#[no_mangle]
pub extern "C" fn memcore_allocate(size: usize, align: usize, caller: usize) -> *mut u8 {
    match general().allocate_at(size, align, call_site(caller)) {
        Ok(ptr) => ptr.as_ptr(),
        Err(err) => {
            warn!(error = %err, "foreign allocation failed");
            core::ptr::null_mut()
        }
    }
}

/// Resize a block from [`memcore_allocate`]; null on failure (old block kept)
///
/// # Safety
/// `ptr` must be null or a live block of `old_size` bytes from this API.
#[no_mangle]
pub unsafe extern "C" fn memcore_reallocate(
    ptr: *mut u8,
    old_size: usize,
    new_size: usize,
    align: usize,
    caller: usize,
) -> *mut u8 {
    match general().reallocate_at(ptr, old_size, new_size, align, call_site(caller)) {
        Ok(resized) => resized.as_ptr(),
        Err(err) => {
            warn!(error = %err, "foreign reallocation failed");
            core::ptr::null_mut()
        }
    }
}

/// Release a block from [`memcore_allocate`]
///
/// # Safety
/// `ptr` must be null or a live block of `size` bytes from this API.
#[no_mangle]
pub unsafe extern "C" fn memcore_free(ptr: *mut u8, size: usize) {
    general().free_at(ptr, size)
}

/// Live bytes held by the general allocator
#[no_mangle]
pub extern "C" fn memcore_usage() -> usize {
    general().usage()
}

/// Start or resume leak tracking
#[no_mangle]
pub extern "C" fn memcore_start_tracking() -> bool {
    tracking::start_allocation_tracking().is_ok()
}

#[no_mangle]
pub extern "C" fn memcore_pause_tracking() {
    tracking::pause_allocation_tracking()
}

/// Stop tracking, print a leak report to stderr, return the leak count
#[no_mangle]
pub extern "C" fn memcore_finish_tracking() -> usize {
    let leaks = tracking::finish_allocation_tracking();
    if let Err(err) = tracking::write_leak_report(&mut io::stderr().lock(), &leaks) {
        warn!(error = %err, "failed to write leak report");
    }
    leaks.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_round_trip() {
        let before = memcore_usage();

        let ptr = memcore_allocate(40, 64, 0);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 64, 0);
        assert_eq!(memcore_usage(), before + 40);

        unsafe {
            ptr.write_bytes(0x3C, 40);
            let grown = memcore_reallocate(ptr, 40, 400, 64, 0x1234);
            assert!(!grown.is_null());
            assert_eq!(grown.read(), 0x3C);
            memcore_free(grown, 400);
            memcore_free(core::ptr::null_mut(), 0);
        }
        assert_eq!(memcore_usage(), before);
    }

    #[test]
    fn foreign_failure_is_null() {
        assert!(memcore_allocate(8, usize::MAX, 0).is_null());
    }

    #[test]
    fn caller_zero_is_unknown() {
        assert_eq!(call_site(0), CallSite::Unknown);
        assert_eq!(call_site(0xbeef), CallSite::Address(0xbeef));
    }
}
