//! Memory subsystem configuration
//!
//! Design: Read once, then frozen. Poisoning and guard pages change the
//! physical layout of allocations, so a block must be freed under the same
//! configuration it was allocated with. The process-wide value is therefore
//! single-assignment: installed explicitly before first use, or loaded from
//! the environment on first use.

use core::ffi::CStr;
use once_cell::sync::OnceCell;

/// Process-wide configuration (assigned at most once)
static CONFIG: OnceCell<MemoryConfig> = OnceCell::new();

/// Configuration for the allocators and the allocation tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Fill memory with recognizable patterns on allocate / free / reset
    pub poison: bool,
    /// Back allocations with trailing inaccessible pages
    pub guard_pages: bool,
    /// Number of tracker buckets (power of two)
    pub tracker_buckets: usize,
    /// Slots per tracker bucket
    pub tracker_bucket_capacity: usize,
}

impl MemoryConfig {
    pub const DEFAULT_TRACKER_BUCKETS: usize = 4096;
    pub const DEFAULT_TRACKER_BUCKET_CAPACITY: usize = 16;

    /// Create config from environment variables
    ///
    /// Unrecognized values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MEMCORE_POISON: 1/true/0/false
        if let Some(flag) = env_flag(b"MEMCORE_POISON\0") {
            config.poison = flag;
        }

        // MEMCORE_GUARD_PAGES: 1/true/0/false
        if let Some(flag) = env_flag(b"MEMCORE_GUARD_PAGES\0") {
            config.guard_pages = flag;
        }

        if let Some(buckets) = env_count(b"MEMCORE_TRACKER_BUCKETS\0") {
            config.tracker_buckets = buckets;
        }

        if let Some(capacity) = env_count(b"MEMCORE_TRACKER_BUCKET_CAPACITY\0") {
            config.tracker_bucket_capacity = capacity;
        }

        config.normalized()
    }

    /// Hardened config: poisoning plus guard pages around every allocation
    pub fn hardened() -> Self {
        Self {
            poison: true,
            guard_pages: true,
            ..Self::default()
        }
    }

    /// Round the bucket count up to a power of two and keep both
    /// tracker dimensions non-zero
    pub fn normalized(mut self) -> Self {
        self.tracker_buckets = self
            .tracker_buckets
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(Self::DEFAULT_TRACKER_BUCKETS);
        self.tracker_bucket_capacity = self.tracker_bucket_capacity.max(1);
        self
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            poison: cfg!(debug_assertions),
            guard_pages: false,
            tracker_buckets: Self::DEFAULT_TRACKER_BUCKETS,
            tracker_bucket_capacity: Self::DEFAULT_TRACKER_BUCKET_CAPACITY,
        }
    }
}

/// Install the process-wide configuration
///
/// Returns the rejected config if one was already installed (explicitly or
/// by an earlier [`get`]).
pub fn install(config: MemoryConfig) -> Result<(), MemoryConfig> {
    CONFIG.set(config.normalized())
}

/// Process-wide configuration, loading it from the environment on first use
pub fn get() -> &'static MemoryConfig {
    CONFIG.get_or_init(MemoryConfig::from_env)
}

// The first heap allocation may land here when the general allocator is the
// global allocator, so the environment is read without allocating.
fn env_value(name: &'static [u8]) -> Option<&'static str> {
    let name = CStr::from_bytes_with_nul(name).ok()?;
    let value = unsafe { libc::getenv(name.as_ptr()) };
    if value.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(value) }.to_str().ok()
}

fn env_flag(name: &'static [u8]) -> Option<bool> {
    let value = env_value(name)?.trim();
    if ["1", "true", "on", "yes"].iter().any(|v| value.eq_ignore_ascii_case(v)) {
        Some(true)
    } else if ["0", "false", "off", "no"].iter().any(|v| value.eq_ignore_ascii_case(v)) {
        Some(false)
    } else {
        None
    }
}

fn env_count(name: &'static [u8]) -> Option<usize> {
    env_value(name)?.trim().parse::<usize>().ok().filter(|&count| count > 0)
}
