//! Core value types shared across the capture and polling pipelines.
//!
//! Everything here is toolkit-neutral: no image types, no widget handles.
//! The presentation layer converts [`Frame`] payloads at its own boundary.

mod frame;
mod update_rate;

pub use frame::{Frame, FrameFormat};
pub use update_rate::UpdateRate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote device endpoint. Immutable once a session or worker is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port (5900 for the front-panel RFB server on Dune-class devices).
    pub port: u16,
    /// Optional VNC password for DES challenge-response authentication.
    pub password: Option<String>,
}

impl Endpoint {
    /// Create an endpoint with no credential.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, password: None }
    }

    /// Attach a VNC password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// `host:port` form for socket addresses and log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Lifecycle state of a capture session.
///
/// `Failed` is terminal for a session instance; a new `connect` call creates
/// a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No transport open.
    Disconnected,
    /// Transport open, protocol negotiation in progress.
    Handshaking,
    /// Negotiated and streaming framebuffer updates.
    Connected,
    /// Cooperative shutdown requested, transport draining.
    Closing,
    /// Unrecoverable I/O or protocol error; the reason is operator-facing.
    Failed(String),
}

impl SessionState {
    /// Whether the session has reached a state it will never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Mouse buttons, mapped to RFB pointer-mask bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    ScrollUp,
    ScrollDown,
}

impl MouseButton {
    /// Bit in the RFB pointer-event button mask (§7.5.5).
    pub fn mask_bit(self) -> u8 {
        match self {
            MouseButton::Left => 1 << 0,
            MouseButton::Middle => 1 << 1,
            MouseButton::Right => 1 << 2,
            MouseButton::ScrollUp => 1 << 3,
            MouseButton::ScrollDown => 1 << 4,
        }
    }
}

/// A local input event destined for the remote front panel.
///
/// Coordinates are in remote-screen space; the caller scales from widget
/// space before submitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Pointer moved. Rapid moves are coalesced to the latest position.
    PointerMove { x: u16, y: u16 },
    /// Button pressed or released at a position. Never coalesced or dropped.
    PointerButton { x: u16, y: u16, button: MouseButton, pressed: bool },
    /// Key pressed or released (X11 keysym). Never coalesced or dropped.
    Key { keysym: u32, pressed: bool },
}

impl InputEvent {
    /// Whether this event may be collapsed with a newer one of the same kind.
    pub fn is_coalescable(&self) -> bool {
        matches!(self, InputEvent::PointerMove { .. })
    }
}

/// Identifies one of the two background data feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedKind {
    /// Device alert listing (CDM alert service).
    Alerts,
    /// Supply/consumable telemetry events.
    Telemetry,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Alerts => write!(f, "alerts"),
            FeedKind::Telemetry => write!(f, "telemetry"),
        }
    }
}

/// Alert severity, normalized across device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Map a CDM severity string, defaulting unknown values to `Warning`.
    pub fn from_wire(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "info" | "informational" => Severity::Info,
            "warning" | "warn" => Severity::Warning,
            "error" => Severity::Error,
            "critical" | "severe" => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

/// A device alert, normalized from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable identifier from the device (e.g. CDM `stringId` or numeric id).
    pub id: String,
    pub severity: Severity,
    /// Operator-facing description.
    pub message: String,
    /// When the alert was observed by the poller.
    pub timestamp: DateTime<Utc>,
}

/// Provenance tag for a normalized telemetry record.
///
/// Records from both wire representations normalize to the same
/// [`TelemetryRecord`] shape; this tag exists for display and debugging
/// only. The raw wire shape never crosses the worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// JSON eventing payloads from Dune-class devices.
    Cdm,
    /// XML status documents from Sirius-class devices.
    Ledm,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Cdm => write!(f, "CDM"),
            WireFormat::Ledm => write!(f, "LEDM"),
        }
    }
}

/// A normalized telemetry data point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Stable identifier (event sequence number or consumable label).
    pub id: String,
    /// Dotted metric path, e.g. `supply.cyan.state`.
    pub metric: String,
    /// Value rendered as text; feeds carry heterogeneous units.
    pub value: String,
    /// When the record was observed by the poller.
    pub timestamp: DateTime<Utc>,
    /// Which wire representation this record was normalized from.
    pub source: WireFormat,
}
