//! Call-site symbolization for leak reports
//!
//! Best effort: the nearest exported symbol from the dynamic loader's table,
//! demangled. Anything that cannot be resolved is printed as a raw address.
//! Results (hits and misses) are cached per address.

use core::fmt;
use dashmap::DashMap;
use once_cell::sync::Lazy;

static CACHE: Lazy<DashMap<usize, Option<Symbol>>> = Lazy::new(DashMap::new);

/// Resolved code address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// File name of the containing module, if known
    pub module: Option<String>,
    /// Demangled function name
    pub name: String,
    /// Distance from the symbol start
    pub offset: usize,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "{}!", module)?;
        }
        write!(f, "{}+{:#x}", self.name, self.offset)
    }
}

/// Resolve a code address to its nearest symbol
pub fn resolve(address: usize) -> Option<Symbol> {
    if address == 0 {
        return None;
    }
    if let Some(cached) = CACHE.get(&address) {
        return cached.value().clone();
    }

    let symbol = sys::lookup(address);
    CACHE.insert(address, symbol.clone());
    symbol
}

/// Human-readable form of a code address; never fails
pub fn describe_address(address: usize) -> String {
    match resolve(address) {
        Some(symbol) => format!("{} ({:#x})", symbol, address),
        None => format!("{:#x}", address),
    }
}

#[cfg(unix)]
mod sys {
    use super::Symbol;
    use std::ffi::CStr;
    use std::path::Path;

    pub fn lookup(address: usize) -> Option<Symbol> {
        let mut info: libc::Dl_info = unsafe { core::mem::zeroed() };
        if unsafe { libc::dladdr(address as *const libc::c_void, &mut info) } == 0 {
            return None;
        }
        if info.dli_sname.is_null() {
            return None;
        }

        let raw = unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy();
        let name = format!("{:#}", rustc_demangle::demangle(&raw));

        let module = (!info.dli_fname.is_null()).then(|| {
            let path = unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy();
            Path::new(path.as_ref())
                .file_name()
                .map(|file| file.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.into_owned())
        });

        Some(Symbol {
            module,
            name,
            offset: address.saturating_sub(info.dli_saddr as usize),
        })
    }
}

// No loader symbol table walk here; reports fall back to raw addresses
#[cfg(not(unix))]
mod sys {
    use super::Symbol;

    pub fn lookup(_address: usize) -> Option<Symbol> {
        None
    }
}
