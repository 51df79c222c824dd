//! Framebuffer assembly.
//!
//! The assembler owns the mutable shadow buffer. Rectangle updates are
//! decoded into it in place; once a complete update batch has been applied,
//! [`FrameAssembler::snapshot`] freezes the shadow into an immutable
//! [`Frame`] that can be shared with any number of consumers. Consumers
//! never observe a half-applied update.

use tracing::debug;

use crate::error::ProtocolError;
use crate::rfb::wire::{RectPayload, UpdateRectangle};
use crate::types::{Frame, FrameFormat};

pub struct FrameAssembler {
    width: u32,
    height: u32,
    format: FrameFormat,
    shadow: Vec<u8>,
    seq: u64,
}

impl FrameAssembler {
    pub fn new(width: u16, height: u16, format: FrameFormat) -> Self {
        let width = u32::from(width);
        let height = u32::from(height);
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self { width, height, format, shadow: vec![0u8; len], seq: 0 }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Apply one complete update batch to the shadow buffer.
    ///
    /// Every rectangle is bounds-checked before any pixel is touched, so a
    /// malformed batch leaves the shadow exactly as it was.
    pub fn apply(&mut self, rects: &[UpdateRectangle]) -> Result<(), ProtocolError> {
        for rect in rects {
            self.check_bounds(rect)?;
        }
        for rect in rects {
            match &rect.payload {
                RectPayload::Raw(pixels) => self.apply_raw(rect, pixels),
                RectPayload::CopyRect { src_x, src_y } => {
                    self.apply_copy_rect(rect, *src_x, *src_y);
                }
                RectPayload::DesktopSize => {
                    debug!(
                        width = rect.width,
                        height = rect.height,
                        "framebuffer resized by server"
                    );
                    self.resize(rect.width, rect.height);
                }
            }
        }
        Ok(())
    }

    /// Freeze the current shadow into an immutable snapshot.
    pub fn snapshot(&mut self) -> Result<Frame, ProtocolError> {
        self.seq += 1;
        Frame::new(self.width, self.height, self.format, self.seq, self.shadow.clone())
    }

    fn check_bounds(&self, rect: &UpdateRectangle) -> Result<(), ProtocolError> {
        // DesktopSize redefines the bounds rather than drawing within them.
        if matches!(rect.payload, RectPayload::DesktopSize) {
            return Ok(());
        }
        let x_end = u32::from(rect.x) + u32::from(rect.width);
        let y_end = u32::from(rect.y) + u32::from(rect.height);
        if x_end > self.width || y_end > self.height {
            return Err(ProtocolError::malformed(
                "update rectangle",
                format!(
                    "rect {}x{}+{}+{} exceeds framebuffer {}x{}",
                    rect.width, rect.height, rect.x, rect.y, self.width, self.height
                ),
            ));
        }
        if let RectPayload::Raw(pixels) = &rect.payload {
            let expected =
                rect.width as usize * rect.height as usize * self.format.bytes_per_pixel();
            if pixels.len() != expected {
                return Err(ProtocolError::malformed(
                    "update rectangle",
                    format!("raw payload is {} bytes, expected {}", pixels.len(), expected),
                ));
            }
        }
        if let RectPayload::CopyRect { src_x, src_y } = rect.payload {
            let src_x_end = u32::from(src_x) + u32::from(rect.width);
            let src_y_end = u32::from(src_y) + u32::from(rect.height);
            if src_x_end > self.width || src_y_end > self.height {
                return Err(ProtocolError::malformed(
                    "update rectangle",
                    format!(
                        "copy source {}x{}+{}+{} exceeds framebuffer {}x{}",
                        rect.width, rect.height, src_x, src_y, self.width, self.height
                    ),
                ));
            }
        }
        Ok(())
    }

    fn apply_raw(&mut self, rect: &UpdateRectangle, pixels: &[u8]) {
        let bpp = self.format.bytes_per_pixel();
        let stride = self.width as usize * bpp;
        let row_len = rect.width as usize * bpp;
        for row in 0..rect.height as usize {
            let src = row * row_len;
            let dst = (rect.y as usize + row) * stride + rect.x as usize * bpp;
            self.shadow[dst..dst + row_len].copy_from_slice(&pixels[src..src + row_len]);
        }
    }

    fn apply_copy_rect(&mut self, rect: &UpdateRectangle, src_x: u16, src_y: u16) {
        let bpp = self.format.bytes_per_pixel();
        let stride = self.width as usize * bpp;
        let row_len = rect.width as usize * bpp;
        // Regions may overlap; stage the source before writing.
        let mut staged = vec![0u8; row_len * rect.height as usize];
        for row in 0..rect.height as usize {
            let src = (src_y as usize + row) * stride + src_x as usize * bpp;
            staged[row * row_len..(row + 1) * row_len]
                .copy_from_slice(&self.shadow[src..src + row_len]);
        }
        for row in 0..rect.height as usize {
            let dst = (rect.y as usize + row) * stride + rect.x as usize * bpp;
            self.shadow[dst..dst + row_len]
                .copy_from_slice(&staged[row * row_len..(row + 1) * row_len]);
        }
    }

    /// Replace the shadow buffer at new dimensions. Previous contents are
    /// discarded; the server follows a resize with a full update.
    fn resize(&mut self, width: u16, height: u16) {
        self.width = u32::from(width);
        self.height = u32::from(height);
        let len = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        self.shadow.clear();
        self.shadow.resize(len, 0);
    }
}
