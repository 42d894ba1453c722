//! Allocation tracking - leak detection by address
//!
//! Design: While tracking, every allocation from the general allocator is
//! recorded with its size and call site in a fixed-capacity table; every
//! free removes its record. Whatever survives when tracking is finished is
//! a leak.
//!
//! State machine:
//! Idle -> Tracking (start) -> Paused (pause) -> Tracking (start resumes)
//! -> Stopped (stop, frozen for inspection) -> Tracking (start clears).
//!
//! The process-wide tracker sits behind a mutex, with an atomic flag checked
//! first so allocation traffic pays one load while tracking is off. A
//! per-thread flag drops allocations made while that thread is already inside
//! the tracker (logging, lock parking), so installing the general allocator as
//! the global allocator cannot recurse into the lock.

mod report;
mod symbols;
mod table;


pub use report::write_leak_report;
pub use symbols::{describe_address, resolve, Symbol};
pub use table::AllocationTracker;

use core::cell::Cell;
use core::fmt;
use core::panic::Location;
use core::sync::atomic::{AtomicBool, Ordering};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use crate::config;
use crate::error::Result;

/// Process-wide tracker wired into the general allocator
static TRACKER: Lazy<Mutex<AllocationTracker>> =
    Lazy::new(|| Mutex::new(AllocationTracker::from_config(config::get())));

/// Mirrors `TRACKER.state() == Tracking` for the lock-free fast path
static ACTIVE: AtomicBool = AtomicBool::new(false);

thread_local! {
    static IN_TRACKER: Cell<bool> = const { Cell::new(false) };
}

/// Tracker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    Tracking,
    Paused,
    Stopped,
}

impl TrackingState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Tracking => "tracking",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

/// Where an allocation was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    /// Source location captured with `#[track_caller]`
    Source(&'static Location<'static>),
    /// Raw code address (e.g. a return address from a foreign caller)
    Address(usize),
    /// Not captured (global allocator path)
    Unknown,
}

impl CallSite {
    /// Capture the caller's source location
    #[track_caller]
    #[inline]
    pub fn caller() -> Self {
        Self::Source(Location::caller())
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(location) => write!(f, "{}", location),
            Self::Address(address) => f.write_str(&describe_address(*address)),
            Self::Unknown => f.write_str("<unknown>"),
        }
    }
}

/// A tracked allocation with no matching free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakRecord {
    pub address: usize,
    pub size: usize,
    pub call_site: CallSite,
}

/// Start (or resume after a pause) process-wide allocation tracking
///
/// Fails only if the tracker table cannot be mapped on first use.
pub fn start_allocation_tracking() -> Result<()> {
    let mut tracker = TRACKER.lock();
    tracker.start()?;
    ACTIVE.store(true, Ordering::Release);
    Ok(())
}

/// Suspend tracking, keeping every record
///
/// Frees made while paused are not seen, so their records survive; the
/// platform handing one of those addresses out again after a resume is
/// reported as a duplicate.
pub fn pause_allocation_tracking() {
    ACTIVE.store(false, Ordering::Release);
    TRACKER.lock().pause();
}

/// Stop tracking and return every allocation that was never freed
pub fn finish_allocation_tracking() -> Vec<LeakRecord> {
    ACTIVE.store(false, Ordering::Release);
    let mut tracker = TRACKER.lock();
    tracker.stop();

    // Tracking is off, so this allocation is not recorded even when the
    // general allocator is the global allocator.
    let mut leaks = Vec::with_capacity(tracker.live_count());
    tracker.get_results(&mut leaks);
    leaks
}

/// Current state of the process-wide tracker
pub fn tracking_state() -> TrackingState {
    TRACKER.lock().state()
}

/// Whether allocations are currently being recorded
#[inline]
pub fn is_tracking() -> bool {
    ACTIVE.load(Ordering::Acquire)
}

#[inline]
pub(crate) fn record_allocation(address: usize, size: usize, call_site: CallSite) {
    if is_tracking() {
        with_tracker(|tracker| tracker.track_allocation(address, size, call_site));
    }
}

#[inline]
pub(crate) fn record_free(address: usize) {
    if is_tracking() {
        with_tracker(|tracker| tracker.track_free(address));
    }
}

/// Clears the re-entrancy flag when the tracker section is left
struct Reentry<'a>(&'a Cell<bool>);

impl Drop for Reentry<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Run `f` on the process-wide tracker unless this thread is already in it
fn with_tracker(f: impl FnOnce(&mut AllocationTracker)) {
    // Thread-local storage may already be gone during thread teardown
    let _ = IN_TRACKER.try_with(|busy| {
        if busy.replace(true) {
            return;
        }
        let _reentry = Reentry(busy);
        f(&mut TRACKER.lock());
    });
}
