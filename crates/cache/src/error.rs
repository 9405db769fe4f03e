//! Error types for the frame cache

use crate::pool::AllocationHandle;
use crate::types::{FrameId, FrameShape};
use thiserror::Error;

/// Errors returned by the block pool
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Not enough free blocks to satisfy the request
    #[error("pool exhausted: {required} blocks required, {free} free")]
    Exhausted { required: usize, free: usize },

    /// Handle is unknown or was already deallocated
    #[error("invalid allocation handle {0:?}")]
    InvalidHandle(AllocationHandle),

    /// Block size or capacity cannot form a pool
    #[error("invalid pool geometry: {capacity_bytes} bytes with {block_size_bytes}-byte blocks")]
    InvalidGeometry {
        capacity_bytes: usize,
        block_size_bytes: usize,
    },
}

/// Errors returned by frame cache operations
///
/// None of these leave the cache in an inconsistent state. A failed `put`
/// simply means the frame is not resident and must be re-decoded on demand.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The frame cannot be cached even with every evictable entry gone
    #[error(
        "cannot cache frame {frame_id}: {size_bytes} bytes needs {required_blocks} blocks, pool has {total_blocks}"
    )]
    AllocationExhausted {
        frame_id: FrameId,
        size_bytes: usize,
        required_blocks: usize,
        total_blocks: usize,
    },

    /// Buffer length does not match `shape` and element type
    #[error("frame {frame_id}: {actual} bytes supplied, shape {shape} requires {expected}")]
    ShapeMismatch {
        frame_id: FrameId,
        shape: FrameShape,
        expected: usize,
        actual: usize,
    },

    /// Zero-sized frames are not cached
    #[error("frame {0} is empty")]
    EmptyFrame(FrameId),

    /// A size given in megabytes does not fit in `usize` bytes
    #[error("{megabytes} MiB is too large to address")]
    SizeOverflow { megabytes: usize },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// A broken internal invariant. Reaching one is a bug, never a runtime condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("usage {usage} exceeds capacity {capacity}")]
    OverCapacity { usage: usize, capacity: usize },

    #[error("usage counter {counter} disagrees with entry sizes {summed}")]
    UsageMismatch { counter: usize, summed: usize },

    #[error("block accounting broken: {0}")]
    BlockAccounting(String),

    #[error("recency list broken: {0}")]
    RecencyList(String),
}

/// Log and panic on a broken invariant
#[cold]
pub(crate) fn fatal(message: &str) -> ! {
    tracing::error!("frame cache invariant violated: {message}");
    panic!("frame cache invariant violated: {message}");
}
