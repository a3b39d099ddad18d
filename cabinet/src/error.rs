use std::io;

use thiserror::Error;

use crate::Ptr;

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Recoverable failures of the memory manager.
///
/// Heap corruption is deliberately absent: see [`corruption`].
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("segmentation fault at {ptr}: {reason}")]
    SegmentationFault { ptr: Ptr, reason: &'static str },

    #[error("out of memory allocating {requested} bytes: {reason}")]
    OutOfMemory {
        requested: usize,
        reason: &'static str,
    },

    #[error("invalid allocation size {size}")]
    InvalidSize { size: usize },

    #[error("swap/snapshot I/O: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("index {index} out of bounds for length {len}")]
    Bounds { index: usize, len: usize },

    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LeaseError {
    #[error("lease is no longer active")]
    Inactive,
    #[error("lease does not match the lease attached to drawer {drawer}")]
    Mismatch { drawer: u32 },
    #[error("no resident drawer is free to lease")]
    Unavailable,
    #[error("drawer {drawer} is leased by another unit")]
    Held { drawer: u32 },
}

impl MemoryError {
    pub(crate) fn segfault(ptr: Ptr, reason: &'static str) -> Self {
        Self::SegmentationFault { ptr, reason }
    }

    pub(crate) fn oom(requested: usize, reason: &'static str) -> Self {
        Self::OutOfMemory { requested, reason }
    }
}

/// Abort on a violated heap invariant.
///
/// An object header carrying a tag the reader cannot accept means typed data
/// was reinterpreted; execution must not continue on that heap.
#[cold]
#[track_caller]
pub fn corruption(ptr: Ptr, tag: u8, expected: &str) -> ! {
    log::error!("heap corruption at {ptr}: tag {tag} where {expected} was expected");
    panic!("heap corruption at {ptr}: tag {tag} where {expected} was expected");
}
