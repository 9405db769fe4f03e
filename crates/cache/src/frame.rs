//! Frame cache with LRU eviction over a block pool
//!
//! Provides bounded in-memory caching of decoded frames. Pixel data lives in
//! fixed-size pool blocks; a recency index orders resident frames so the least
//! recently used one is evicted first when memory runs out.
//!
//! All state sits behind one mutex. Every public operation holds it for its
//! whole duration, so the LRU order is exactly the order in which operations
//! acquire the lock.

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, FrameBuffer, FrameView};
use crate::error::{fatal, CacheError, CacheResult, InvariantViolation};
use crate::loader::{FrameLoader, LoadedFrame};
use crate::pool::BlockPool;
use crate::recency::RecencyIndex;
use crate::stats::CacheStats;
use crate::timing::{CacheOp, OpTiming, TimingHook};
use crate::types::{ElementType, FrameId, FrameShape};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// How a successful `put` was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New frame stored
    Inserted,
    /// Existing frame of the same size overwritten in its blocks
    UpdatedInPlace,
    /// Existing frame's blocks released and fresh ones taken
    Replaced,
}

/// A frame removed by eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub frame_id: FrameId,
    pub size_bytes: usize,
}

/// Result of [`FrameCache::get_or_load`]
#[derive(Debug)]
pub enum Fetched {
    /// Frame was already resident
    Hit(FrameView),
    /// Frame was decoded and is now resident
    Loaded(FrameView),
    /// Frame was decoded but could not be cached
    Uncached(LoadedFrame),
}

impl Fetched {
    pub fn is_hit(&self) -> bool {
        matches!(self, Fetched::Hit(_))
    }

    /// Copy the frame bytes out, wherever they live
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Fetched::Hit(view) | Fetched::Loaded(view) => view.to_vec(),
            Fetched::Uncached(frame) => frame.data.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    insertions: u64,
    failed_puts: u64,
}

/// Internal cache state
struct CacheState {
    pool: BlockPool,
    index: RecencyIndex<FrameId, CacheEntry>,
    usage_bytes: usize,
    capacity_bytes: usize,
    counters: Counters,
}

impl CacheState {
    fn new(pool: BlockPool) -> Self {
        Self {
            capacity_bytes: pool.capacity_bytes(),
            pool,
            index: RecencyIndex::new(),
            usage_bytes: 0,
            counters: Counters::default(),
        }
    }

    fn get(&mut self, frame_id: FrameId) -> Option<FrameView> {
        match self.index.get_mut(&frame_id) {
            Some(entry) => {
                entry.last_access = Instant::now();
                let view = entry.view();
                self.index.touch(&frame_id);
                self.counters.hits += 1;
                Some(view)
            }
            None => {
                self.counters.misses += 1;
                None
            }
        }
    }

    fn put(
        &mut self,
        frame_id: FrameId,
        data: &[u8],
        shape: FrameShape,
        element_type: ElementType,
    ) -> CacheResult<(PutOutcome, FrameView)> {
        let size_bytes = data.len();
        let expected = shape.byte_len(element_type);
        if size_bytes != expected {
            return Err(CacheError::ShapeMismatch {
                frame_id,
                shape,
                expected,
                actual: size_bytes,
            });
        }
        if size_bytes == 0 {
            return Err(CacheError::EmptyFrame(frame_id));
        }

        self.assert_consistent("put");

        // Same size and nobody reading: overwrite in place
        if let Some(entry) = self.index.get_mut(&frame_id) {
            if entry.size_bytes() == size_bytes {
                if let Some(buffer) = Arc::get_mut(&mut entry.buffer) {
                    buffer.overwrite(data, shape, element_type);
                    entry.last_access = Instant::now();
                    let view = entry.view();
                    self.index.touch(&frame_id);
                    self.counters.insertions += 1;
                    self.assert_consistent("put");
                    return Ok((PutOutcome::UpdatedInPlace, view));
                }
            }
        }

        let required_blocks = self.pool.blocks_for(size_bytes);
        if required_blocks > self.pool.total_blocks() {
            tracing::warn!(
                "frame {frame_id} ({size_bytes} bytes) exceeds cache capacity of {} bytes",
                self.capacity_bytes
            );
            return Err(self.exhausted(frame_id, size_bytes));
        }

        let replaced = match self.index.remove(&frame_id) {
            Some(old) => {
                tracing::debug!(
                    "replacing frame {frame_id}: {} -> {size_bytes} bytes",
                    old.size_bytes()
                );
                self.usage_bytes -= old.size_bytes();
                self.release(old);
                true
            }
            None => false,
        };

        let allocation = match self.pool.allocate(size_bytes) {
            Ok(allocation) => allocation,
            Err(_) => {
                self.make_room(size_bytes);
                match self.pool.allocate(size_bytes) {
                    Ok(allocation) => allocation,
                    Err(error) => {
                        tracing::warn!(
                            "cannot cache frame {frame_id} after evicting: {error} ({} blocks pinned by readers)",
                            self.pool.pinned_block_count()
                        );
                        self.assert_consistent("put");
                        return Err(self.exhausted(frame_id, size_bytes));
                    }
                }
            }
        };

        let entry = CacheEntry::new(FrameBuffer::new(
            frame_id,
            allocation,
            data,
            shape,
            element_type,
        ));
        let view = entry.view();
        self.index.push_front(frame_id, entry);
        self.usage_bytes += size_bytes;
        self.counters.insertions += 1;

        self.assert_consistent("put");

        let outcome = if replaced {
            PutOutcome::Replaced
        } else {
            PutOutcome::Inserted
        };
        Ok((outcome, view))
    }

    fn exhausted(&mut self, frame_id: FrameId, size_bytes: usize) -> CacheError {
        self.counters.failed_puts += 1;
        CacheError::AllocationExhausted {
            frame_id,
            size_bytes,
            required_blocks: self.pool.blocks_for(size_bytes),
            total_blocks: self.pool.total_blocks(),
        }
    }

    /// Evict from the LRU end until `size_bytes` fits in bytes and in free blocks
    fn make_room(&mut self, size_bytes: usize) {
        while !self.index.is_empty() {
            // Views dropped meanwhile may have returned blocks
            self.pool.reclaim();
            if self.usage_bytes + size_bytes <= self.capacity_bytes
                && self.pool.can_allocate(size_bytes)
            {
                break;
            }
            self.evict_lru();
        }
    }

    fn evict_lru(&mut self) -> Option<Evicted> {
        let (frame_id, entry) = self.index.pop_back()?;
        let size_bytes = entry.size_bytes();
        self.usage_bytes -= size_bytes;
        self.counters.evictions += 1;
        self.release(entry);
        tracing::debug!("evicted frame {frame_id} ({size_bytes} bytes)");
        Some(Evicted {
            frame_id,
            size_bytes,
        })
    }

    /// Give an entry's blocks back to the pool, or defer it while readers hold it
    fn release(&mut self, entry: CacheEntry) {
        match Arc::try_unwrap(entry.buffer) {
            Ok(buffer) => {
                if let Err(error) = self.pool.deallocate(buffer.allocation) {
                    fatal(&format!("deallocating frame {}: {error}", buffer.frame_id));
                }
            }
            Err(pinned) => {
                tracing::debug!(
                    "frame {} released while pinned; freeing when last view drops",
                    pinned.frame_id
                );
                self.pool.detach(pinned.allocation.handle());
            }
        }
    }

    fn remove(&mut self, frame_id: FrameId) -> bool {
        match self.index.remove(&frame_id) {
            Some(entry) => {
                self.usage_bytes -= entry.size_bytes();
                self.release(entry);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for (_, entry) in self.index.drain() {
            self.release(entry);
        }
        self.usage_bytes = 0;
        self.counters = Counters::default();
        self.pool.reclaim();
    }

    fn stats(&mut self) -> CacheStats {
        self.pool.reclaim();
        CacheStats {
            hits: self.counters.hits,
            misses: self.counters.misses,
            usage_bytes: self.usage_bytes,
            capacity_bytes: self.capacity_bytes,
            entry_count: self.index.len(),
            evictions: self.counters.evictions,
            insertions: self.counters.insertions,
            failed_puts: self.counters.failed_puts,
            free_blocks: self.pool.free_block_count(),
            total_blocks: self.pool.total_blocks(),
            pinned_blocks: self.pool.pinned_block_count(),
        }
    }

    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.usage_bytes > self.capacity_bytes {
            return Err(InvariantViolation::OverCapacity {
                usage: self.usage_bytes,
                capacity: self.capacity_bytes,
            });
        }

        let summed: usize = self.index.iter().map(|(_, entry)| entry.size_bytes()).sum();
        if summed != self.usage_bytes {
            return Err(InvariantViolation::UsageMismatch {
                counter: self.usage_bytes,
                summed,
            });
        }

        self.index.check_invariants()?;
        self.pool.check_invariants()?;

        let entry_blocks: usize = self.index.iter().map(|(_, entry)| entry.block_count()).sum();
        let owned_blocks = self.pool.owned_block_count();
        if entry_blocks != owned_blocks {
            return Err(InvariantViolation::BlockAccounting(format!(
                "entries hold {entry_blocks} blocks, pool has {owned_blocks} owned"
            )));
        }

        Ok(())
    }

    /// Full check in debug builds, capacity bound only in release
    fn assert_consistent(&self, operation: &str) {
        if cfg!(debug_assertions) {
            if let Err(violation) = self.check_invariants() {
                fatal(&format!("{operation}: {violation}"));
            }
        } else if self.usage_bytes > self.capacity_bytes {
            fatal(&format!(
                "{operation}: usage {} exceeds capacity {}",
                self.usage_bytes, self.capacity_bytes
            ));
        }
    }
}

fn mb_to_bytes(megabytes: usize) -> CacheResult<usize> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or(CacheError::SizeOverflow { megabytes })
}

/// Bounded frame cache with LRU eviction
///
/// Thread-safe; share it behind an `Arc` between the UI thread and prefetch
/// workers.
///
/// # Example
///
/// ```
/// use annotator_cache::{ElementType, FrameCache, FrameId, FrameShape};
///
/// // Four 1 KiB blocks
/// let cache = FrameCache::new(4 * 1024, 1024).unwrap();
///
/// let shape = FrameShape::new(16, 16, 4);
/// let pixels = vec![0u8; shape.byte_len(ElementType::U8)];
/// cache.put(FrameId(0), &pixels, shape, ElementType::U8).unwrap();
///
/// if let Some(view) = cache.get(FrameId(0)) {
///     assert_eq!(view.to_vec(), pixels);
/// }
///
/// let stats = cache.statistics();
/// println!("Hit rate: {:.2}%", stats.hit_rate() * 100.0);
/// ```
pub struct FrameCache {
    state: Mutex<CacheState>,
    timing_hook: Option<TimingHook>,
}

impl FrameCache {
    /// Create a cache over a pool of `capacity_bytes / block_size_bytes` blocks
    pub fn new(capacity_bytes: usize, block_size_bytes: usize) -> CacheResult<Self> {
        let pool = BlockPool::new(capacity_bytes, block_size_bytes)?;
        if pool.capacity_bytes() != capacity_bytes {
            tracing::debug!(
                "cache capacity rounded down from {capacity_bytes} to {} bytes",
                pool.capacity_bytes()
            );
        }
        Ok(Self {
            state: Mutex::new(CacheState::new(pool)),
            timing_hook: None,
        })
    }

    /// Create a cache with sizes in megabytes
    pub fn with_mb_limits(capacity_mb: usize, block_size_mb: usize) -> CacheResult<Self> {
        Self::new(mb_to_bytes(capacity_mb)?, mb_to_bytes(block_size_mb)?)
    }

    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        Self::new(config.capacity_bytes, config.block_size_bytes)
    }

    /// Report every operation's duration to `hook`
    pub fn with_timing_hook(mut self, hook: TimingHook) -> Self {
        self.timing_hook = Some(hook);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, op: CacheOp, frame_id: Option<FrameId>, start: Instant) {
        let timing = OpTiming {
            op,
            frame_id,
            elapsed: start.elapsed(),
        };
        tracing::trace!("cache {} {:?} took {:?}", timing.op, timing.frame_id, timing.elapsed);
        if let Some(hook) = &self.timing_hook {
            hook(&timing);
        }
    }

    /// Retrieve a frame, marking it most recently used
    ///
    /// A miss only increments the miss counter. The caller is expected to
    /// decode the frame and `put` it.
    pub fn get(&self, frame_id: FrameId) -> Option<FrameView> {
        let start = Instant::now();
        let view = self.lock().get(frame_id);
        self.report(CacheOp::Get, Some(frame_id), start);
        view
    }

    /// Store a frame, evicting least recently used frames if needed
    ///
    /// `data` must be exactly `shape.byte_len(element_type)` bytes. A frame
    /// larger than the whole pool is rejected without evicting anything.
    pub fn put(
        &self,
        frame_id: FrameId,
        data: &[u8],
        shape: FrameShape,
        element_type: ElementType,
    ) -> CacheResult<PutOutcome> {
        self.put_with_view(frame_id, data, shape, element_type)
            .map(|(outcome, _)| outcome)
    }

    fn put_with_view(
        &self,
        frame_id: FrameId,
        data: &[u8],
        shape: FrameShape,
        element_type: ElementType,
    ) -> CacheResult<(PutOutcome, FrameView)> {
        let start = Instant::now();
        let result = self.lock().put(frame_id, data, shape, element_type);
        self.report(CacheOp::Put, Some(frame_id), start);
        result
    }

    /// Evict the least recently used frame
    pub fn evict_one(&self) -> Option<Evicted> {
        let start = Instant::now();
        let evicted = {
            let mut state = self.lock();
            state.assert_consistent("evict");
            let evicted = state.evict_lru();
            state.assert_consistent("evict");
            evicted
        };
        self.report(CacheOp::Evict, evicted.map(|e| e.frame_id), start);
        evicted
    }

    /// Drop one frame, e.g. after its source image changed
    pub fn remove(&self, frame_id: FrameId) -> bool {
        let start = Instant::now();
        let removed = {
            let mut state = self.lock();
            let removed = state.remove(frame_id);
            state.assert_consistent("remove");
            removed
        };
        self.report(CacheOp::Remove, Some(frame_id), start);
        removed
    }

    /// Evict everything and reset counters
    pub fn clear(&self) {
        let start = Instant::now();
        {
            let mut state = self.lock();
            state.clear();
            state.assert_consistent("clear");
        }
        tracing::debug!("cleared frame cache");
        self.report(CacheOp::Clear, None, start);
    }

    /// Check residency without touching recency or counters
    pub fn contains(&self, frame_id: FrameId) -> bool {
        self.lock().index.contains(&frame_id)
    }

    /// Get, or decode through `loader` and store
    ///
    /// Decode failures are logged and reported as `None`; the cache records
    /// nothing for them.
    pub fn get_or_load(&self, frame_id: FrameId, loader: &dyn FrameLoader) -> Option<Fetched> {
        if let Some(view) = self.get(frame_id) {
            return Some(Fetched::Hit(view));
        }

        let frame = match loader.load(frame_id) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!("{error}");
                return None;
            }
        };

        match self.put_with_view(frame_id, &frame.data, frame.shape, frame.element_type) {
            Ok((_, view)) => Some(Fetched::Loaded(view)),
            Err(error) => {
                tracing::debug!("serving frame {frame_id} uncached: {error}");
                Some(Fetched::Uncached(frame))
            }
        }
    }

    /// Current statistics
    pub fn statistics(&self) -> CacheStats {
        self.lock().stats()
    }

    /// Resident frames from most to least recently used
    pub fn recency_order(&self) -> Vec<FrameId> {
        self.lock().index.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().index.is_empty()
    }

    pub fn usage_bytes(&self) -> usize {
        self.lock().usage_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.lock().capacity_bytes
    }

    pub fn block_size(&self) -> usize {
        self.lock().pool.block_size()
    }

    /// Verify internal consistency
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.lock().check_invariants()
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FrameCache")
            .field("pool", &state.pool)
            .field("entries", &state.index.len())
            .field("usage_bytes", &state.usage_bytes)
            .finish()
    }
}
