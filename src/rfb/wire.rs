//! RFB message encoding and decoding.
//!
//! Client messages are built as owned byte vectors and written whole.
//! Server messages are decoded from a caller-owned buffer one message at a
//! time: [`decode_server_message`] returns the message together with the
//! number of bytes it consumed, or `None` when the buffer holds only a
//! prefix of the next message. TCP reads land wherever they land; the codec
//! never assumes message boundaries align with read boundaries.

use bytes::Buf;

use crate::error::ProtocolError;
use crate::rfb::pixel_format::PixelFormat;

/// Length of the version banner exchanged at connection open.
pub const VERSION_BANNER_LEN: usize = 12;

/// Upper bound on a single Raw rectangle payload. Large enough for a full
/// 4K framebuffer at 4 bytes per pixel; anything above it cannot be a
/// front-panel update and must not grow the read buffer while the session
/// waits for bytes that will never be valid.
const MAX_RAW_PAYLOAD: usize = 64 * 1024 * 1024;

/// RFB protocol versions this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// Parse a 12-byte version banner such as `RFB 003.008\n`.
    ///
    /// Per RFC 6143 §7.1.1 an unknown minor version at major 3 is treated
    /// as 3.3, so only a non-RFB banner is an error.
    pub fn from_banner(banner: &[u8]) -> Result<Self, ProtocolError> {
        if banner.len() != VERSION_BANNER_LEN
            || !banner.starts_with(b"RFB ")
            || banner[VERSION_BANNER_LEN - 1] != b'\n'
        {
            return Err(ProtocolError::malformed(
                "version banner",
                format!("not an RFB banner: {:02x?}", banner),
            ));
        }
        match &banner[4..11] {
            b"003.008" => Ok(ProtocolVersion::V3_8),
            b"003.007" => Ok(ProtocolVersion::V3_7),
            b"003.003" => Ok(ProtocolVersion::V3_3),
            other if other.starts_with(b"003.") => Ok(ProtocolVersion::V3_3),
            other => Err(ProtocolError::malformed(
                "version banner",
                format!("unsupported version: {}", String::from_utf8_lossy(other)),
            )),
        }
    }

    /// The banner to send back to the server.
    pub fn banner(self) -> &'static [u8; VERSION_BANNER_LEN] {
        match self {
            ProtocolVersion::V3_3 => b"RFB 003.003\n",
            ProtocolVersion::V3_7 => b"RFB 003.007\n",
            ProtocolVersion::V3_8 => b"RFB 003.008\n",
        }
    }
}

/// Security types negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityType {
    None,
    VncAuthentication,
}

impl SecurityType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(SecurityType::None),
            2 => Some(SecurityType::VncAuthentication),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            SecurityType::None => 1,
            SecurityType::VncAuthentication => 2,
        }
    }
}

/// Rectangle encodings this client advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    CopyRect,
    /// Pseudo-encoding: the server announces a framebuffer resize.
    DesktopSize,
}

impl Encoding {
    pub fn to_wire(self) -> i32 {
        match self {
            Encoding::Raw => 0,
            Encoding::CopyRect => 1,
            Encoding::DesktopSize => -223,
        }
    }
}

/// Server parameters received in `ServerInit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    /// Minimum length of a `ServerInit` message (before the name bytes).
    pub const HEADER_LEN: usize = 24;

    /// Parse from a complete buffer. Used during the handshake, where the
    /// transport reads the fixed header first and then the name.
    pub fn parse(header: &[u8], name_bytes: &[u8]) -> Result<Self, ProtocolError> {
        if header.len() != Self::HEADER_LEN {
            return Err(ProtocolError::malformed(
                "ServerInit",
                format!("header is {} bytes, expected {}", header.len(), Self::HEADER_LEN),
            ));
        }
        let width = u16::from_be_bytes([header[0], header[1]]);
        let height = u16::from_be_bytes([header[2], header[3]]);
        let mut pf_bytes = [0u8; 16];
        pf_bytes.copy_from_slice(&header[4..20]);
        let name_len = u32::from_be_bytes([header[20], header[21], header[22], header[23]]);
        if name_bytes.len() != name_len as usize {
            return Err(ProtocolError::malformed(
                "ServerInit",
                format!("name is {} bytes, header declared {}", name_bytes.len(), name_len),
            ));
        }
        Ok(Self {
            width,
            height,
            pixel_format: PixelFormat::from_bytes(&pf_bytes),
            name: String::from_utf8_lossy(name_bytes).into_owned(),
        })
    }

    /// Declared length of the name, read from a raw header.
    pub fn name_len(header: &[u8]) -> Result<usize, ProtocolError> {
        if header.len() != Self::HEADER_LEN {
            return Err(ProtocolError::malformed("ServerInit", "short header"));
        }
        Ok(u32::from_be_bytes([header[20], header[21], header[22], header[23]]) as usize)
    }
}

// ---------------------------------------------------------------------------
// Client messages (RFC 6143 §7.5)
// ---------------------------------------------------------------------------

/// `ClientInit`: the shared flag. Always shared so polling tools can watch
/// the same panel without kicking each other off.
pub fn client_init(shared: bool) -> [u8; 1] {
    [u8::from(shared)]
}

/// `SetPixelFormat` message (type 0).
pub fn set_pixel_format(format: &PixelFormat) -> Vec<u8> {
    let mut msg = Vec::with_capacity(20);
    msg.push(0);
    msg.extend_from_slice(&[0, 0, 0]); // padding
    msg.extend_from_slice(&format.to_bytes());
    msg
}

/// `SetEncodings` message (type 2).
pub fn set_encodings(encodings: &[Encoding]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(4 + encodings.len() * 4);
    msg.push(2);
    msg.push(0); // padding
    msg.extend_from_slice(&(encodings.len() as u16).to_be_bytes());
    for enc in encodings {
        msg.extend_from_slice(&enc.to_wire().to_be_bytes());
    }
    msg
}

/// `FramebufferUpdateRequest` message (type 3).
pub fn framebuffer_update_request(
    incremental: bool,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
) -> [u8; 10] {
    let mut msg = [0u8; 10];
    msg[0] = 3;
    msg[1] = u8::from(incremental);
    msg[2..4].copy_from_slice(&x.to_be_bytes());
    msg[4..6].copy_from_slice(&y.to_be_bytes());
    msg[6..8].copy_from_slice(&width.to_be_bytes());
    msg[8..10].copy_from_slice(&height.to_be_bytes());
    msg
}

/// `KeyEvent` message (type 4). `keysym` is an X11 keysym.
pub fn key_event(keysym: u32, pressed: bool) -> [u8; 8] {
    let mut msg = [0u8; 8];
    msg[0] = 4;
    msg[1] = u8::from(pressed);
    // 2..4 padding
    msg[4..8].copy_from_slice(&keysym.to_be_bytes());
    msg
}

/// `PointerEvent` message (type 5). `button_mask` has one bit per button,
/// see [`crate::types::MouseButton::mask_bit`].
pub fn pointer_event(button_mask: u8, x: u16, y: u16) -> [u8; 6] {
    let mut msg = [0u8; 6];
    msg[0] = 5;
    msg[1] = button_mask;
    msg[2..4].copy_from_slice(&x.to_be_bytes());
    msg[4..6].copy_from_slice(&y.to_be_bytes());
    msg
}

// ---------------------------------------------------------------------------
// Server messages (RFC 6143 §7.6)
// ---------------------------------------------------------------------------

/// One rectangle of a framebuffer update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub payload: RectPayload,
}

/// Decoded rectangle contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RectPayload {
    /// Raw pixels, `width * height * bytes_per_pixel` bytes, row-major.
    Raw(Vec<u8>),
    /// Copy a region already on screen from the source position.
    CopyRect { src_x: u16, src_y: u16 },
    /// The framebuffer was resized to the rectangle's width and height.
    DesktopSize,
}

/// A message from the server, decoded off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    FramebufferUpdate(Vec<UpdateRectangle>),
    /// Palette entries for indexed pixel formats. `first_colour` is the
    /// starting palette index; colours are (r, g, b) with 16-bit channels.
    ColourMapEntries { first_colour: u16, colours: Vec<(u16, u16, u16)> },
    Bell,
    CutText(String),
}

/// Decode one server message from the front of `buf`.
///
/// Returns the message and the number of bytes consumed, or `Ok(None)` when
/// `buf` holds only part of the next message and more input is needed.
/// `format` is the negotiated pixel format and scales Raw payloads.
///
/// Errors are fatal: an unknown message type or an internally inconsistent
/// rectangle leaves the stream position meaningless.
pub fn decode_server_message(
    buf: &[u8],
    format: &PixelFormat,
) -> Result<Option<(ServerMessage, usize)>, ProtocolError> {
    let mut cur = buf;
    if !cur.has_remaining() {
        return Ok(None);
    }
    let total = buf.len();
    let msg_type = cur.get_u8();
    let message = match msg_type {
        0 => match decode_framebuffer_update(&mut cur, format.bytes_per_pixel())? {
            Some(rects) => ServerMessage::FramebufferUpdate(rects),
            None => return Ok(None),
        },
        1 => match decode_colour_map(&mut cur)? {
            Some(msg) => msg,
            None => return Ok(None),
        },
        2 => ServerMessage::Bell,
        3 => match decode_cut_text(&mut cur)? {
            Some(text) => ServerMessage::CutText(text),
            None => return Ok(None),
        },
        other => {
            return Err(ProtocolError::malformed(
                "server message",
                format!("unknown message type {other}"),
            ));
        }
    };
    Ok(Some((message, total - cur.remaining())))
}

fn decode_framebuffer_update(
    cur: &mut &[u8],
    bytes_per_pixel: usize,
) -> Result<Option<Vec<UpdateRectangle>>, ProtocolError> {
    if cur.remaining() < 3 {
        return Ok(None);
    }
    cur.advance(1); // padding
    let count = cur.get_u16();
    let mut rects = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cur.remaining() < 12 {
            return Ok(None);
        }
        let x = cur.get_u16();
        let y = cur.get_u16();
        let width = cur.get_u16();
        let height = cur.get_u16();
        let encoding = cur.get_i32();
        let payload = match encoding {
            0 => {
                let len = width as usize * height as usize * bytes_per_pixel;
                if len > MAX_RAW_PAYLOAD {
                    return Err(ProtocolError::malformed(
                        "framebuffer update",
                        format!(
                            "rect {width}x{height} declares a {len} byte payload, \
                             exceeds sanity limit"
                        ),
                    ));
                }
                if cur.remaining() < len {
                    return Ok(None);
                }
                let mut pixels = vec![0u8; len];
                cur.copy_to_slice(&mut pixels);
                RectPayload::Raw(pixels)
            }
            1 => {
                if cur.remaining() < 4 {
                    return Ok(None);
                }
                let src_x = cur.get_u16();
                let src_y = cur.get_u16();
                RectPayload::CopyRect { src_x, src_y }
            }
            -223 => RectPayload::DesktopSize,
            other => {
                return Err(ProtocolError::malformed(
                    "framebuffer update",
                    format!("rectangle uses unnegotiated encoding {other}"),
                ));
            }
        };
        rects.push(UpdateRectangle { x, y, width, height, payload });
    }
    Ok(Some(rects))
}

fn decode_colour_map(cur: &mut &[u8]) -> Result<Option<ServerMessage>, ProtocolError> {
    if cur.remaining() < 5 {
        return Ok(None);
    }
    cur.advance(1); // padding
    let first_colour = cur.get_u16();
    let count = cur.get_u16() as usize;
    if cur.remaining() < count * 6 {
        return Ok(None);
    }
    let mut colours = Vec::with_capacity(count);
    for _ in 0..count {
        colours.push((cur.get_u16(), cur.get_u16(), cur.get_u16()));
    }
    Ok(Some(ServerMessage::ColourMapEntries { first_colour, colours }))
}

fn decode_cut_text(cur: &mut &[u8]) -> Result<Option<String>, ProtocolError> {
    if cur.remaining() < 7 {
        return Ok(None);
    }
    cur.advance(3); // padding
    let len = cur.get_u32() as usize;
    if len > 1 << 20 {
        return Err(ProtocolError::malformed(
            "cut text",
            format!("declared length {len} exceeds sanity limit"),
        ));
    }
    if cur.remaining() < len {
        return Ok(None);
    }
    let mut text = vec![0u8; len];
    cur.copy_to_slice(&mut text);
    Ok(Some(String::from_utf8_lossy(&text).into_owned()))
}
