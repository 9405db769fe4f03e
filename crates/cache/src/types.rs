//! Frame identifiers and pixel layout descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a frame within a sequence.
///
/// Displays as a zero-padded frame number (`000042`), matching the file
/// naming used by extracted image sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl FrameId {
    /// Frame index as a plain number
    pub fn index(self) -> u64 {
        self.0
    }

    /// Offset by a signed delta, clamping at frame 0
    pub fn saturating_offset(self, delta: i64) -> Self {
        if delta >= 0 {
            FrameId(self.0.saturating_add(delta as u64))
        } else {
            FrameId(self.0.saturating_sub(delta.unsigned_abs()))
        }
    }
}

impl From<u64> for FrameId {
    fn from(index: u64) -> Self {
        FrameId(index)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// Scalar type of one channel value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    U8,
    U16,
    F32,
}

impl ElementType {
    /// Size of one element in bytes
    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::F32 => 4,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::F32 => "f32",
        };
        f.write_str(name)
    }
}

/// Dimensions of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameShape {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Channels per pixel (3 for RGB, 4 for RGBA)
    pub channels: u32,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of scalar elements in the frame, or `None` if it overflows `usize`
    pub fn checked_element_count(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }

    /// Number of scalar elements in the frame, saturating at `usize::MAX`
    pub fn element_count(&self) -> usize {
        self.checked_element_count().unwrap_or(usize::MAX)
    }

    /// Bytes the frame occupies, or `None` if it overflows `usize`
    pub fn checked_byte_len(&self, element_type: ElementType) -> Option<usize> {
        self.checked_element_count()?
            .checked_mul(element_type.size_bytes())
    }

    /// Bytes the frame occupies for the given element type
    ///
    /// Saturates at `usize::MAX`, a length no buffer can have, so an
    /// unaddressable shape never matches real pixel data.
    pub fn byte_len(&self, element_type: ElementType) -> usize {
        self.checked_byte_len(element_type).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_display_is_zero_padded() {
        assert_eq!(FrameId(42).to_string(), "000042");
        assert_eq!(FrameId(1_234_567).to_string(), "1234567");
    }

    #[test]
    fn test_frame_id_saturating_offset() {
        assert_eq!(FrameId(10).saturating_offset(5), FrameId(15));
        assert_eq!(FrameId(10).saturating_offset(-4), FrameId(6));
        assert_eq!(FrameId(2).saturating_offset(-10), FrameId(0));
        assert_eq!(FrameId(u64::MAX).saturating_offset(1), FrameId(u64::MAX));
    }

    #[test]
    fn test_shape_byte_len() {
        let shape = FrameShape::new(1920, 1080, 3);
        assert_eq!(shape.element_count(), 1920 * 1080 * 3);
        assert_eq!(shape.byte_len(ElementType::U8), 1920 * 1080 * 3);
        assert_eq!(shape.byte_len(ElementType::U16), 1920 * 1080 * 3 * 2);
        assert_eq!(shape.byte_len(ElementType::F32), 1920 * 1080 * 3 * 4);
    }

    #[test]
    fn test_shape_byte_len_overflow() {
        let shape = FrameShape::new(u32::MAX, u32::MAX, 4);
        assert_eq!(shape.checked_byte_len(ElementType::F32), None);
        assert_eq!(shape.byte_len(ElementType::F32), usize::MAX);
        assert_eq!(shape.element_count(), usize::MAX);
        assert_eq!(
            FrameShape::new(2, 3, 4).checked_byte_len(ElementType::U16),
            Some(48)
        );
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(FrameShape::new(640, 480, 4).to_string(), "640x480x4");
    }
}
