//! Fixed-capacity, address-hashed record table
//!
//! One anonymous mapping split into `buckets` runs of `bucket_capacity`
//! slots. A record lands in the bucket picked by hashing the address bits
//! above the heap alignment and takes the first empty slot there. A full bucket is
//! fatal; the table never grows.

use core::mem;
use core::panic::Location;
use core::ptr::NonNull;
use core::slice;
use crate::allocator::MIN_ALIGN;
use crate::config::MemoryConfig;
use crate::error::{AllocError, Result};
use crate::logging::log_tracking_transition;
use crate::os;
use super::{CallSite, LeakRecord, TrackingState};

const SITE_UNKNOWN: usize = 0;
const SITE_SOURCE: usize = 1;
const SITE_ADDRESS: usize = 2;

/// One record slot; all-zero means empty
#[repr(C)]
#[derive(Clone, Copy)]
struct Slot {
    address: usize,
    size: usize,
    site_kind: usize,
    site: usize,
}

impl Slot {
    const EMPTY: Self = Self {
        address: 0,
        size: 0,
        site_kind: SITE_UNKNOWN,
        site: 0,
    };

    fn new(address: usize, size: usize, call_site: CallSite) -> Self {
        let (site_kind, site) = match call_site {
            CallSite::Source(location) => (SITE_SOURCE, location as *const Location<'static> as usize),
            CallSite::Address(address) => (SITE_ADDRESS, address),
            CallSite::Unknown => (SITE_UNKNOWN, 0),
        };
        Self {
            address,
            size,
            site_kind,
            site,
        }
    }

    #[inline]
    fn is_occupied(&self) -> bool {
        self.address != 0
    }

    fn call_site(&self) -> CallSite {
        match self.site_kind {
            // Only ever written from a `&'static Location`
            SITE_SOURCE => CallSite::Source(unsafe { &*(self.site as *const Location<'static>) }),
            SITE_ADDRESS => CallSite::Address(self.site),
            _ => CallSite::Unknown,
        }
    }

    fn record(&self) -> LeakRecord {
        LeakRecord {
            address: self.address,
            size: self.size,
            call_site: self.call_site(),
        }
    }
}

/// Leak detector over a fixed record table
///
/// Operations other than [`start`](Self::start) take effect only while the
/// state is [`TrackingState::Tracking`].
pub struct AllocationTracker {
    table: Option<NonNull<Slot>>,
    buckets: usize,
    bucket_capacity: usize,
    state: TrackingState,
    live: usize,
}

// Safety: the tracker exclusively owns its table mapping
unsafe impl Send for AllocationTracker {}

impl AllocationTracker {
    /// Tracker with `buckets` (rounded up to a power of two) x
    /// `bucket_capacity` slots; nothing is mapped until the first start
    pub fn new(buckets: usize, bucket_capacity: usize) -> Self {
        let buckets = buckets.max(1).checked_next_power_of_two().unwrap_or(1 << 12);
        Self {
            table: None,
            buckets,
            bucket_capacity: bucket_capacity.max(1),
            state: TrackingState::Idle,
            live: 0,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.tracker_buckets, config.tracker_bucket_capacity)
    }

    #[inline]
    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Number of recorded allocations without a matching free
    ///
    /// Frees of addresses that were never recorded leave it unchanged, so
    /// it always equals the number of occupied slots.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Total number of slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets * self.bucket_capacity
    }

    /// Begin tracking
    ///
    /// From Idle or Stopped the table is cleared first (and mapped on first
    /// use); from Paused tracking resumes with every record intact.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            TrackingState::Tracking => return Ok(()),
            TrackingState::Paused => {}
            TrackingState::Idle | TrackingState::Stopped => self.prime()?,
        }
        self.transition(TrackingState::Tracking);
        Ok(())
    }

    /// Suspend tracking, keeping every record
    pub fn pause(&mut self) {
        if self.state == TrackingState::Tracking {
            self.transition(TrackingState::Paused);
        }
    }

    /// Suspend tracking and freeze the records for inspection
    pub fn stop(&mut self) {
        if matches!(self.state, TrackingState::Tracking | TrackingState::Paused) {
            self.transition(TrackingState::Stopped);
        }
    }

    /// Record a live allocation
    ///
    /// Recording an address that is already live, or filling a bucket, is
    /// fatal.
    pub fn track_allocation(&mut self, address: usize, size: usize, call_site: CallSite) {
        if self.state != TrackingState::Tracking || address == 0 {
            return;
        }

        let index = self.bucket_index(address);
        let capacity = self.bucket_capacity;
        let bucket = self.bucket_mut(index);
        let mut free_slot = None;
        for (i, slot) in bucket.iter().enumerate() {
            if slot.address == address {
                crate::fatal!("allocation {:#x} tracked twice", address);
            }
            if free_slot.is_none() && !slot.is_occupied() {
                free_slot = Some(i);
            }
        }

        match free_slot {
            Some(i) => bucket[i] = Slot::new(address, size, call_site),
            None => crate::fatal!(
                "tracker bucket {} full ({} slots) recording {:#x}",
                index,
                capacity,
                address
            ),
        }
        self.live += 1;
    }

    /// Drop the record for `address`
    ///
    /// Unknown addresses (e.g. allocated before tracking started) are ignored.
    pub fn track_free(&mut self, address: usize) {
        if self.state != TrackingState::Tracking || address == 0 {
            return;
        }

        let index = self.bucket_index(address);
        if let Some(slot) = self.bucket_mut(index).iter_mut().find(|slot| slot.address == address) {
            *slot = Slot::EMPTY;
            self.live -= 1;
        }
    }

    /// Append every outstanding record to `out`
    pub fn get_results(&self, out: &mut Vec<LeakRecord>) {
        out.extend(self.slots().iter().filter(|slot| slot.is_occupied()).map(Slot::record));
    }

    /// Fold page and megabyte bits into the key so that page-aligned
    /// blocks, whose low bits are all zero, still spread over the buckets
    #[inline]
    pub(super) fn bucket_index(&self, address: usize) -> usize {
        let key = address >> MIN_ALIGN.trailing_zeros();
        (key ^ (key >> 8) ^ (key >> 16)) & (self.buckets - 1)
    }

    fn slots(&self) -> &[Slot] {
        match self.table {
            Some(table) => unsafe { slice::from_raw_parts(table.as_ptr(), self.capacity()) },
            None => &[],
        }
    }

    fn bucket_mut(&mut self, index: usize) -> &mut [Slot] {
        let start = index * self.bucket_capacity;
        let len = self.bucket_capacity;
        match self.table {
            // Safety: `start + len <= capacity`, and the table is ours
            Some(table) => unsafe { slice::from_raw_parts_mut(table.as_ptr().add(start), len) },
            None => &mut [],
        }
    }

    /// Map the table on first use, otherwise zero it
    fn prime(&mut self) -> Result<()> {
        match self.table {
            Some(table) => unsafe {
                core::ptr::write_bytes(table.as_ptr(), 0, self.capacity());
            },
            None => {
                let oom = AllocError::out_of_memory(self.capacity(), mem::align_of::<Slot>());
                let len = self.capacity().checked_mul(mem::size_of::<Slot>()).ok_or(oom)?;
                // Fresh mappings are already zeroed
                self.table = Some(os::map(len)?.cast::<Slot>());
            }
        }
        self.live = 0;
        Ok(())
    }

    fn transition(&mut self, to: TrackingState) {
        log_tracking_transition(self.state.as_str(), to.as_str(), self.live);
        self.state = to;
    }

    fn table_len(&self) -> usize {
        self.capacity() * mem::size_of::<Slot>()
    }
}

impl Drop for AllocationTracker {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            unsafe { os::unmap(table.cast(), self.table_len()) };
        }
    }
}
