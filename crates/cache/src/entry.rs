//! Cache entries and the views handed out to readers

use crate::pool::{Allocation, AllocationHandle, BlockView};
use crate::types::{ElementType, FrameId, FrameShape};
use std::sync::Arc;
use std::time::Instant;

/// Pixel data of one cached frame, stored in pool blocks
#[derive(Debug)]
pub(crate) struct FrameBuffer {
    pub(crate) frame_id: FrameId,
    pub(crate) allocation: Allocation,
    pub(crate) size_bytes: usize,
    pub(crate) shape: FrameShape,
    pub(crate) element_type: ElementType,
}

impl FrameBuffer {
    pub(crate) fn new(
        frame_id: FrameId,
        mut allocation: Allocation,
        data: &[u8],
        shape: FrameShape,
        element_type: ElementType,
    ) -> Self {
        allocation.write(data);
        Self {
            frame_id,
            allocation,
            size_bytes: data.len(),
            shape,
            element_type,
        }
    }

    /// Overwrite the pixels of a frame with the same byte size
    pub(crate) fn overwrite(&mut self, data: &[u8], shape: FrameShape, element_type: ElementType) {
        debug_assert_eq!(data.len(), self.size_bytes);
        self.allocation.write(data);
        self.shape = shape;
        self.element_type = element_type;
    }

    fn view(&self) -> BlockView<'_> {
        self.allocation
            .view(self.size_bytes, self.shape, self.element_type)
    }
}

/// Metadata for one resident frame
///
/// The entry shares its buffer with any [`FrameView`] handed out by `get`;
/// while such a view is alive the entry is pinned and its blocks cannot be
/// reused.
#[derive(Debug)]
pub struct CacheEntry {
    pub(crate) buffer: Arc<FrameBuffer>,
    pub(crate) last_access: Instant,
}

impl CacheEntry {
    pub(crate) fn new(buffer: FrameBuffer) -> Self {
        Self {
            buffer: Arc::new(buffer),
            last_access: Instant::now(),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.buffer.frame_id
    }

    pub fn size_bytes(&self) -> usize {
        self.buffer.size_bytes
    }

    pub fn shape(&self) -> FrameShape {
        self.buffer.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.buffer.element_type
    }

    /// Time of the last hit or store
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn handle(&self) -> AllocationHandle {
        self.buffer.allocation.handle()
    }

    pub fn block_count(&self) -> usize {
        self.buffer.allocation.block_count()
    }

    /// Whether a reader currently holds a view of this entry
    pub fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.buffer) > 1
    }

    pub(crate) fn view(&self) -> FrameView {
        FrameView {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Read-only, zero-copy view of a cached frame
///
/// The view keeps the frame's blocks alive: if the frame is evicted or
/// replaced while the view exists, its memory is released only when the last
/// clone of the view is dropped. Hold views briefly; pinned blocks still
/// count against the pool.
#[derive(Debug, Clone)]
pub struct FrameView {
    buffer: Arc<FrameBuffer>,
}

impl FrameView {
    pub fn frame_id(&self) -> FrameId {
        self.buffer.frame_id
    }

    pub fn shape(&self) -> FrameShape {
        self.buffer.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.buffer.element_type
    }

    /// Frame size in bytes
    pub fn len(&self) -> usize {
        self.buffer.size_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.size_bytes == 0
    }

    /// Borrow the underlying block memory
    pub fn bytes(&self) -> BlockView<'_> {
        self.buffer.view()
    }

    /// Per-block byte slices in frame order
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.buffer.view().chunks()
    }

    /// The frame as one slice, if it lies in a single block
    pub fn as_contiguous(&self) -> Option<&[u8]> {
        self.buffer.view().as_contiguous()
    }

    pub fn copy_to(&self, out: &mut [u8]) {
        self.buffer.view().copy_to(out)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.view().to_vec()
    }
}
