//! Interface to the frame decode pipeline
//!
//! The cache never decodes anything itself. On a miss the caller (or the
//! prefetch scheduler) asks a [`FrameLoader`] for the frame and stores the
//! result with `put`.

use crate::types::{ElementType, FrameId, FrameShape};
use thiserror::Error;

/// Failure to produce a frame from its source
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No frame exists at this index
    #[error("frame {0} does not exist")]
    NotFound(FrameId),

    /// The source could not be read
    #[error("failed to read frame {frame_id}: {source}")]
    Io {
        frame_id: FrameId,
        #[source]
        source: std::io::Error,
    },

    /// The source was read but could not be decoded
    #[error("failed to decode frame {frame_id}: {reason}")]
    Corrupt { frame_id: FrameId, reason: String },
}

/// A decoded frame ready to be cached
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFrame {
    pub data: Vec<u8>,
    pub shape: FrameShape,
    pub element_type: ElementType,
}

impl LoadedFrame {
    pub fn new(data: Vec<u8>, shape: FrameShape, element_type: ElementType) -> Self {
        Self {
            data,
            shape,
            element_type,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Source of decoded frames (image sequence, video stream, ...)
///
/// Implementations must be callable from prefetch worker threads.
pub trait FrameLoader: Send + Sync {
    /// Decode one frame
    fn load(&self, frame_id: FrameId) -> Result<LoadedFrame, DecodeError>;

    /// Number of frames in the source, when known
    fn frame_count(&self) -> Option<u64> {
        None
    }
}
