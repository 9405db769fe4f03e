//! Cache statistics snapshot

use serde::Serialize;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of `get` calls that found the frame
    pub hits: u64,

    /// Number of `get` calls that did not
    pub misses: u64,

    /// Bytes held by resident frames
    pub usage_bytes: usize,

    /// Usable capacity of the block pool in bytes
    pub capacity_bytes: usize,

    /// Number of resident frames
    pub entry_count: usize,

    /// Frames evicted to make room or by explicit `evict_one`
    pub evictions: u64,

    /// Successful `put` calls
    pub insertions: u64,

    /// `put` calls that could not obtain memory
    pub failed_puts: u64,

    /// Blocks currently unassigned
    pub free_blocks: usize,

    /// Blocks in the pool
    pub total_blocks: usize,

    /// Blocks of evicted frames still held by outstanding views
    pub pinned_blocks: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            self.usage_bytes as f64 / self.capacity_bytes as f64
        }
    }
}
