//! Logging infrastructure - structured tracing for the allocators
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels via `EnvFilter`
//! - Zero-cost when disabled
//! - Console or file output, human-readable or JSON
//!
//! Allocation events are emitted at TRACE, arena and mapping lifecycle at
//! DEBUG, tracking state transitions at INFO and leak summaries at WARN.

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

mod macros;

// Re-export tracing macros for use throughout the crate
pub use tracing::{debug, error, info, trace, warn, Level};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MEMCORE_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("MEMCORE_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // MEMCORE_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("MEMCORE_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("MEMCORE_LOG_JSON").is_ok();
        config.show_spans = std::env::var("MEMCORE_LOG_SPANS").is_ok();

        config
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Every allocation event
    pub fn verbose() -> Self {
        Self {
            level: Level::TRACE,
            show_spans: true,
            ..Self::default()
        }
    }
}

fn parse_level(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber; later calls are ignored.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("memcore={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let output: Box<dyn Layer<Registry> + Send + Sync> = match config.log_path.as_deref() {
            Some(path) if config.file_output => {
                let path = Path::new(path);
                let directory = path.parent().unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .map(|name| name.to_os_string())
                    .unwrap_or_else(|| "memcore.log".into());
                let appender = tracing_appender::rolling::never(directory, file_name);
                let layer = fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_span_events(span_events)
                    .with_target(true);
                if config.json_format {
                    layer.json().boxed()
                } else {
                    layer.boxed()
                }
            }
            _ => {
                let layer = fmt::layer()
                    .with_writer(io::stderr)
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_thread_ids(cfg!(debug_assertions))
                    .with_line_number(cfg!(debug_assertions));
                if config.json_format {
                    layer.json().boxed()
                } else {
                    layer.compact().boxed()
                }
            }
        };

        // Another subscriber may already own the process (e.g. a host
        // application); that is not an error for us.
        let _ = tracing_subscriber::registry()
            .with(output)
            .with(env_filter)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Allocation-domain logging functions
// ============================================================================

/// Log memory allocation
#[inline]
pub fn log_allocation(allocator: &'static str, size: usize, align: usize, ptr: *const u8) {
    trace!(
        event = "allocation",
        allocator,
        size_bytes = size,
        align,
        address = ?ptr,
        "Memory allocated"
    );
}

/// Log memory deallocation
#[inline]
pub fn log_deallocation(allocator: &'static str, size: usize, ptr: *const u8) {
    trace!(
        event = "deallocation",
        allocator,
        size_bytes = size,
        address = ?ptr,
        "Memory deallocated"
    );
}

/// Log a page mapping for the large-object path
pub fn log_large_mapping(requested: usize, actual: usize, ptr: *const u8) {
    debug!(
        event = "large_mapping",
        requested_bytes = requested,
        actual_bytes = actual,
        address = ?ptr,
        "Pages mapped"
    );
}

/// Log arena creation
pub fn log_arena_created(capacity: usize, base: *const u8) {
    debug!(
        event = "arena_created",
        capacity_bytes = capacity,
        base = ?base,
        "Arena reserved"
    );
}

/// Log arena reset
pub fn log_arena_reset(released: usize, cursor: *const u8) {
    trace!(
        event = "arena_reset",
        released_bytes = released,
        cursor = ?cursor,
        "Arena cursor rewound"
    );
}

/// Log arena destruction
pub fn log_arena_destroyed(capacity: usize, used: usize) {
    debug!(
        event = "arena_destroyed",
        capacity_bytes = capacity,
        used_bytes = used,
        "Arena released"
    );
}

/// Log scoped allocator teardown
pub fn log_scope_exit(cleanups: usize, released: usize) {
    trace!(
        event = "scope_exit",
        cleanups_run = cleanups,
        released_bytes = released,
        "Scoped allocator torn down"
    );
}

/// Log tracker state transition
pub fn log_tracking_transition(from: &'static str, to: &'static str, live: usize) {
    info!(
        event = "tracking_transition",
        from,
        to,
        live_allocations = live,
        "Allocation tracking state changed"
    );
}

/// Log leak summary
pub fn log_leak_summary(count: usize, bytes: usize) {
    if count == 0 {
        info!(event = "leak_summary", "No leaked allocations");
    } else {
        warn!(
            event = "leak_summary",
            leaks = count,
            leaked_bytes = bytes,
            "Leaked allocations detected"
        );
    }
}

/// Stop the process after a `fatal!` event
///
/// Aborts without unwinding: `fatal!` fires inside `GlobalAlloc` methods
/// and on corrupted allocator state, where unwinding is not allowed. Unit
/// tests of this crate panic instead so `#[should_panic]` can observe it.
#[doc(hidden)]
#[cold]
#[inline(never)]
pub fn halt(message: std::fmt::Arguments<'_>) -> ! {
    #[cfg(test)]
    {
        panic!("{}", message)
    }
    #[cfg(not(test))]
    {
        use std::io::Write;
        let _ = writeln!(io::stderr(), "memcore: fatal: {}", message);
        std::process::abort()
    }
}
