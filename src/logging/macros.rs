//! Logging macros

/// Halt on a violated structural invariant
///
/// Emits an error event on the `memcore::fatal` target, then aborts the
/// process (see [`halt`](crate::logging::halt)). Execution never continues
/// past a corrupted allocator state.
///
/// Usage:
/// ```ignore
/// fatal!("arena reset to {:p} outside [{:p}, {:p}]", target, begin, cursor);
/// ```
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        $crate::logging::error!(target: "memcore::fatal", $($arg)+);
        $crate::logging::halt(::core::format_args!($($arg)+))
    }};
}
