//! Leak report formatting

use std::io::{self, Write};
use crate::logging::log_leak_summary;
use super::LeakRecord;

/// Write a human-readable leak report
///
/// One header line with the count and total size, then one line per leak:
/// address, size, call site (symbolized where possible).
pub fn write_leak_report<W: Write>(out: &mut W, leaks: &[LeakRecord]) -> io::Result<()> {
    let total: usize = leaks.iter().map(|leak| leak.size).sum();
    log_leak_summary(leaks.len(), total);

    if leaks.is_empty() {
        return writeln!(out, "no leaked allocations");
    }

    writeln!(out, "{} leaked allocation(s), {} bytes total", leaks.len(), total)?;
    for leak in leaks {
        writeln!(
            out,
            "  {:#018x}  {:>10} bytes  at {}",
            leak.address, leak.size, leak.call_site
        )?;
    }
    out.flush()
}
