//! Allocation errors
//!
//! Two structural kinds only. Both are returned to the immediate caller and
//! never retried: exhaustion needs intervention, and a bad alignment is a
//! caller bug. Invariant violations are not errors, see [`crate::fatal!`].

use thiserror::Error;

/// Failure of an allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The backing region or the platform ran out of memory
    #[error("out of memory: {size} bytes aligned to {align}")]
    OutOfMemory { size: usize, align: usize },

    /// The alignment cannot be represented by the underlying primitive
    #[error("unsupported alignment: {align}")]
    BadAlignment { align: usize },
}

impl AllocError {
    #[inline]
    pub const fn out_of_memory(size: usize, align: usize) -> Self {
        Self::OutOfMemory { size, align }
    }

    #[inline]
    pub const fn bad_alignment(align: usize) -> Self {
        Self::BadAlignment { align }
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

pub type Result<T> = core::result::Result<T, AllocError>;
