//! Fixed-size block pool backing cached frames
//!
//! The pool partitions its capacity into equally sized blocks and hands out
//! runs of blocks as [`Allocation`]s. Allocation and deallocation are O(blocks)
//! with no external fragmentation; a frame smaller than a block still consumes
//! the whole block.
//!
//! Block memory is materialized the first time a block is handed out and is
//! reused from then on, so a large configured capacity costs nothing until
//! frames actually arrive.
//!
//! An [`Allocation`] owns the slabs of its blocks while it is alive. When one is
//! dropped without being passed back through [`BlockPool::deallocate`] (for
//! example the last reader of an evicted frame lets go of it), its slabs are
//! parked in a reclaim queue and returned to the free list by the next
//! [`BlockPool::reclaim`].

use crate::error::{fatal, InvariantViolation, PoolError};
use crate::types::{ElementType, FrameShape};
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque handle identifying one allocation. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationHandle(u64);

type Slab = Box<[u8]>;

/// Slabs returned by allocations dropped outside the pool
#[derive(Default)]
struct ReclaimQueue {
    returned: Mutex<Vec<(AllocationHandle, Vec<Slab>)>>,
}

impl ReclaimQueue {
    fn push(&self, handle: AllocationHandle, slabs: Vec<Slab>) {
        self.returned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle, slabs));
    }

    fn drain(&self) -> Vec<(AllocationHandle, Vec<Slab>)> {
        mem::take(&mut *self.returned.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A run of blocks owned by one cached frame
pub struct Allocation {
    handle: AllocationHandle,
    blocks: Vec<usize>,
    slabs: Vec<Slab>,
    block_size: usize,
    reclaim: Arc<ReclaimQueue>,
}

impl Allocation {
    /// Handle of this allocation
    pub fn handle(&self) -> AllocationHandle {
        self.handle
    }

    /// Number of blocks in the run
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total bytes available in the run
    pub fn capacity(&self) -> usize {
        self.blocks.len() * self.block_size
    }

    /// Copy `data` into the run, starting at the first block
    ///
    /// # Panics
    ///
    /// Panics if `data` is larger than the run.
    pub fn write(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.capacity(),
            "write of {} bytes into {}-byte allocation",
            data.len(),
            self.capacity()
        );
        for (slab, chunk) in self.slabs.iter_mut().zip(data.chunks(self.block_size)) {
            slab[..chunk.len()].copy_from_slice(chunk);
        }
    }

    /// Zero-copy view over the first `size_bytes` of the run
    pub fn view(&self, size_bytes: usize, shape: FrameShape, element_type: ElementType) -> BlockView<'_> {
        debug_assert!(size_bytes <= self.capacity());
        BlockView {
            slabs: &self.slabs,
            len: size_bytes.min(self.capacity()),
            shape,
            element_type,
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if !self.slabs.is_empty() {
            self.reclaim.push(self.handle, mem::take(&mut self.slabs));
        }
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("handle", &self.handle)
            .field("blocks", &self.blocks)
            .finish()
    }
}

/// Read-only window over allocation memory
///
/// Frames spanning several blocks are not contiguous; iterate [`chunks`](Self::chunks)
/// or copy out with [`copy_to`](Self::copy_to).
#[derive(Clone, Copy)]
pub struct BlockView<'a> {
    slabs: &'a [Slab],
    len: usize,
    shape: FrameShape,
    element_type: ElementType,
}

impl<'a> BlockView<'a> {
    /// Length of the frame in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Per-block byte slices, truncated to the frame length
    pub fn chunks(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let slabs = self.slabs;
        let mut remaining = self.len;
        slabs.iter().map_while(move |slab| {
            if remaining == 0 {
                return None;
            }
            let take = remaining.min(slab.len());
            remaining -= take;
            Some(&slab[..take])
        })
    }

    /// The whole frame as one slice, if it lies in a single block
    pub fn as_contiguous(&self) -> Option<&'a [u8]> {
        match self.slabs {
            [] if self.len == 0 => Some(&[]),
            [slab] => Some(&slab[..self.len]),
            [slab, ..] if self.len <= slab.len() => Some(&slab[..self.len]),
            _ => None,
        }
    }

    /// Copy the frame into `out`, which must be exactly [`len`](Self::len) bytes
    ///
    /// # Panics
    ///
    /// Panics if `out` has the wrong length.
    pub fn copy_to(&self, out: &mut [u8]) {
        assert_eq!(out.len(), self.len, "destination length mismatch");
        let mut offset = 0;
        for chunk in self.chunks() {
            out[offset..offset + chunk.len()].copy_from_slice(chunk);
            offset += chunk.len();
        }
    }

    /// Copy the frame into a new buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// Pool of fixed-size memory blocks
pub struct BlockPool {
    block_size: usize,
    /// Backing memory per block; `None` while lent out or not yet materialized
    slabs: Vec<Option<Slab>>,
    free_blocks: Vec<usize>,
    allocations: HashMap<AllocationHandle, Vec<usize>>,
    /// Allocations released by their owner but still held by readers
    detached: HashSet<AllocationHandle>,
    next_handle: u64,
    reclaim: Arc<ReclaimQueue>,
}

impl BlockPool {
    /// Create a pool of `capacity_bytes / block_size_bytes` blocks
    ///
    /// Any remainder of `capacity_bytes` that does not fill a whole block is unused.
    pub fn new(capacity_bytes: usize, block_size_bytes: usize) -> Result<Self, PoolError> {
        if block_size_bytes == 0 || capacity_bytes < block_size_bytes {
            return Err(PoolError::InvalidGeometry {
                capacity_bytes,
                block_size_bytes,
            });
        }

        let total_blocks = capacity_bytes / block_size_bytes;
        let mut slabs = Vec::with_capacity(total_blocks);
        slabs.resize_with(total_blocks, || None);

        Ok(Self {
            block_size: block_size_bytes,
            slabs,
            // Popped from the back, so low indices are handed out first
            free_blocks: (0..total_blocks).rev().collect(),
            allocations: HashMap::new(),
            detached: HashSet::new(),
            next_handle: 0,
            reclaim: Arc::new(ReclaimQueue::default()),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn total_blocks(&self) -> usize {
        self.slabs.len()
    }

    /// Usable capacity in bytes
    pub fn capacity_bytes(&self) -> usize {
        self.total_blocks() * self.block_size
    }

    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    /// Number of live allocations, detached ones included
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Blocks needed to hold `size_bytes`
    pub fn blocks_for(&self, size_bytes: usize) -> usize {
        size_bytes.div_ceil(self.block_size)
    }

    /// Whether an allocation of `size_bytes` would currently succeed
    pub fn can_allocate(&self, size_bytes: usize) -> bool {
        self.blocks_for(size_bytes) <= self.free_blocks.len()
    }

    /// Take enough blocks to hold `size_bytes`
    ///
    /// Fails without taking anything when too few blocks are free.
    pub fn allocate(&mut self, size_bytes: usize) -> Result<Allocation, PoolError> {
        self.reclaim();

        let required = self.blocks_for(size_bytes);
        if required > self.free_blocks.len() {
            return Err(PoolError::Exhausted {
                required,
                free: self.free_blocks.len(),
            });
        }

        let at = self.free_blocks.len() - required;
        let blocks: Vec<usize> = self.free_blocks.drain(at..).rev().collect();
        let block_size = self.block_size;
        let slabs = blocks
            .iter()
            .map(|&index| {
                self.slabs[index]
                    .take()
                    .unwrap_or_else(|| vec![0u8; block_size].into_boxed_slice())
            })
            .collect();

        let handle = AllocationHandle(self.next_handle);
        self.next_handle += 1;
        self.allocations.insert(handle, blocks.clone());

        Ok(Allocation {
            handle,
            blocks,
            slabs,
            block_size,
            reclaim: Arc::clone(&self.reclaim),
        })
    }

    /// Return an allocation's blocks to the free list
    ///
    /// Handles are invalidated on first use; an unknown handle is rejected
    /// and none of its blocks are touched.
    pub fn deallocate(&mut self, mut allocation: Allocation) -> Result<(), PoolError> {
        let slabs = mem::take(&mut allocation.slabs);
        self.return_blocks(allocation.handle, slabs)
    }

    /// Mark an allocation as released by its owner while readers still hold it
    pub fn detach(&mut self, handle: AllocationHandle) {
        if self.allocations.contains_key(&handle) {
            self.detached.insert(handle);
        }
    }

    /// Blocks held only by outstanding readers
    pub fn pinned_block_count(&self) -> usize {
        self.detached
            .iter()
            .filter_map(|handle| self.allocations.get(handle))
            .map(Vec::len)
            .sum()
    }

    /// Blocks held by allocations that still have an owner
    pub fn owned_block_count(&self) -> usize {
        self.allocations
            .iter()
            .filter(|(handle, _)| !self.detached.contains(handle))
            .map(|(_, blocks)| blocks.len())
            .sum()
    }

    /// Return blocks of allocations dropped since the last call
    ///
    /// Returns the number of allocations reclaimed.
    pub fn reclaim(&mut self) -> usize {
        let returned = self.reclaim.drain();
        let count = returned.len();
        for (handle, slabs) in returned {
            if let Err(error) = self.return_blocks(handle, slabs) {
                fatal(&format!("reclaiming dropped allocation: {error}"));
            }
        }
        count
    }

    fn return_blocks(&mut self, handle: AllocationHandle, slabs: Vec<Slab>) -> Result<(), PoolError> {
        let blocks = self
            .allocations
            .remove(&handle)
            .ok_or(PoolError::InvalidHandle(handle))?;
        self.detached.remove(&handle);

        for (&index, slab) in blocks.iter().zip(slabs) {
            self.slabs[index] = Some(slab);
        }
        self.free_blocks.extend(blocks);
        Ok(())
    }

    /// Verify every block is either free or owned by exactly one allocation
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen = vec![false; self.total_blocks()];
        let owned = self.allocations.values().flatten();

        for &index in self.free_blocks.iter().chain(owned) {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(InvariantViolation::BlockAccounting(format!(
                        "block {index} referenced twice"
                    )))
                }
                None => {
                    return Err(InvariantViolation::BlockAccounting(format!(
                        "block {index} out of range"
                    )))
                }
            }
        }

        if let Some(index) = seen.iter().position(|&s| !s) {
            return Err(InvariantViolation::BlockAccounting(format!(
                "block {index} is neither free nor allocated"
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("total_blocks", &self.total_blocks())
            .field("free_blocks", &self.free_blocks.len())
            .field("allocations", &self.allocations.len())
            .finish()
    }
}
