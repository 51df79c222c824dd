//! RFB pixel format descriptor (RFC 6143 §7.4).

use crate::types::FrameFormat;

/// Describes how pixels are laid out in framebuffer update payloads.
///
/// Negotiated during the handshake: the server declares its native format in
/// `ServerInit`, and the client pins the stream to a known format with
/// `SetPixelFormat` so every Raw rectangle decodes the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Bits per pixel on the wire (8, 16, or 32).
    pub bits_per_pixel: u8,
    /// Number of useful bits in each pixel value.
    pub depth: u8,
    /// Most significant byte first when true.
    pub big_endian: bool,
    /// True colour (as opposed to colour-map indices).
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The 32-bit true-colour format this client always negotiates.
    pub fn rgba32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }

    /// 8-bit colour-map format some panel firmwares expose.
    pub fn indexed8() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_colour: false,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        }
    }

    /// Serialize to the 16-byte wire layout.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0] = self.bits_per_pixel;
        buf[1] = self.depth;
        buf[2] = u8::from(self.big_endian);
        buf[3] = u8::from(self.true_colour);
        buf[4..6].copy_from_slice(&self.red_max.to_be_bytes());
        buf[6..8].copy_from_slice(&self.green_max.to_be_bytes());
        buf[8..10].copy_from_slice(&self.blue_max.to_be_bytes());
        buf[10] = self.red_shift;
        buf[11] = self.green_shift;
        buf[12] = self.blue_shift;
        // 13..16 padding
        buf
    }

    /// Parse from the 16-byte wire layout.
    pub fn from_bytes(buf: &[u8; 16]) -> Self {
        Self {
            bits_per_pixel: buf[0],
            depth: buf[1],
            big_endian: buf[2] != 0,
            true_colour: buf[3] != 0,
            red_max: u16::from_be_bytes([buf[4], buf[5]]),
            green_max: u16::from_be_bytes([buf[6], buf[7]]),
            blue_max: u16::from_be_bytes([buf[8], buf[9]]),
            red_shift: buf[10],
            green_shift: buf[11],
            blue_shift: buf[12],
        }
    }

    /// Bytes per pixel (1, 2, or 4).
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize).div_ceil(8)
    }

    /// Map onto the toolkit-neutral frame format tag, when representable.
    pub fn frame_format(&self) -> Option<FrameFormat> {
        match (self.bits_per_pixel, self.true_colour) {
            (32, true) => Some(FrameFormat::Rgba32),
            (8, false) => Some(FrameFormat::Indexed8),
            _ => None,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgba32()
    }
}
