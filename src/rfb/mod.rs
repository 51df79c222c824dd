//! RFB (remote framebuffer) wire protocol support.
//!
//! Implements the negotiated subset of RFC 6143 the front-panel server
//! speaks: version exchange, `None`/VNC security, Raw and CopyRect
//! rectangle encodings plus the DesktopSize pseudo-encoding, and the
//! client input messages.
//!
//! Decoding is pull-based: [`wire::decode_server_message`] consumes exactly
//! one message from a byte cursor and reports how many bytes it used, or
//! signals that more bytes are needed. The session owns the read buffer and
//! never assumes one network read equals one message.

pub mod auth;
pub mod pixel_format;
pub mod wire;

pub use pixel_format::PixelFormat;
pub use wire::{
    Encoding, ProtocolVersion, RectPayload, SecurityType, ServerInit, ServerMessage,
    UpdateRectangle,
};
