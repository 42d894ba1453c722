//! memcore - memory-allocation core
//!
//! Allocators sharing one capability set ([`Allocator`]):
//! - [`GeneralAllocator`]: platform heap, over-alignment, page-granular
//!   large objects, optional guard-page hardening
//! - [`Arena`]: one reserved region, bump cursor, bulk reset
//! - [`ScopedAllocator`]: strictly nested lifetimes over an arena, with
//!   cleanups run in reverse order on teardown
//!
//! plus an address-hashed [`AllocationTracker`] for leak detection.

pub mod allocator;
pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod os;
pub mod poison;
pub mod tracking;

// Re-export core types
pub use allocator::{general, Allocator, Arena, GeneralAllocator, LargeBlock, ScopedAllocator};
pub use config::MemoryConfig;
pub use error::{AllocError, Result};
pub use tracking::{
    finish_allocation_tracking, pause_allocation_tracking, start_allocation_tracking,
    write_leak_report, AllocationTracker, CallSite, LeakRecord, TrackingState,
};

/// Initialize logging from the environment and load the memory config
///
/// Optional: everything initializes lazily on first use. Call
/// [`config::install`] first to override the environment.
pub fn init() {
    logging::init();
    let config = config::get();
    logging::debug!(
        poison = config.poison,
        guard_pages = config.guard_pages,
        tracker_slots = config.tracker_buckets * config.tracker_bucket_capacity,
        "memcore initialized"
    );
}
