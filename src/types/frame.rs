//! Frame snapshot types for the capture pipeline.

use std::sync::Arc;

use crate::error::ProtocolError;

/// Pixel layout of a published frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// 32-bit true colour, one byte each of R, G, B, X in memory order.
    Rgba32,
    /// 8-bit palette indices; the palette lives with the consumer.
    Indexed8,
}

impl FrameFormat {
    /// Bytes per pixel for this layout.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Rgba32 => 4,
            FrameFormat::Indexed8 => 1,
        }
    }
}

/// An immutable, fully assembled framebuffer snapshot.
///
/// This is the fundamental unit handed to consumers. The payload is shared
/// via `Arc`, so cloning a frame is cheap and no consumer can mutate the
/// pixels another consumer sees. A frame is never torn: the assembler only
/// publishes after a complete update batch has been applied.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels, always > 0.
    pub width: u32,

    /// Height in pixels, always > 0.
    pub height: u32,

    /// Pixel layout of the payload.
    pub format: FrameFormat,

    /// Monotonic snapshot counter, restarts at 1 per session.
    pub seq: u64,

    /// Pixel data, `width * height * bytes_per_pixel` bytes (zero-copy via Arc).
    pub payload: Arc<[u8]>,
}

impl Frame {
    /// Create a new frame snapshot, validating the payload length against
    /// the declared dimensions and format.
    pub fn new(
        width: u32,
        height: u32,
        format: FrameFormat,
        seq: u64,
        payload: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        if width == 0 || height == 0 {
            return Err(ProtocolError::malformed(
                "frame",
                format!("zero dimension: {width}x{height}"),
            ));
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if payload.len() != expected {
            return Err(ProtocolError::malformed(
                "frame",
                format!(
                    "payload length {} does not match {}x{} ({} expected)",
                    payload.len(),
                    width,
                    height,
                    expected
                ),
            ));
        }
        Ok(Self { width, height, format, seq, payload: payload.into() })
    }

    /// Byte length of one pixel row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}
