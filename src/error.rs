//! Error types for the front-panel core.
//!
//! Each subsystem carries its own taxonomy so callers can match on exactly
//! the failures that concern them:
//!
//! - [`ConnectError`]: establishing a remote framebuffer session
//! - [`ProtocolError`]: wire-level decode failures, always fatal to a session
//! - [`FetchError`]: poll-feed failures, never fatal to a worker
//! - [`InputError`]: input forwarding failures, recoverable
//!
//! All errors implement `std::error::Error`, are `Send + Sync + 'static`,
//! and chain their causes through `#[source]`.
//!
//! ## Recovery
//!
//! Poll-feed errors expose [`FetchError::is_retryable`]; the worker retries
//! on the next interval either way, but consumers can use the flag to decide
//! how loudly to surface the condition:
//!
//! ```rust
//! use frontpanel::FetchError;
//!
//! let error = FetchError::network("connection reset by peer");
//! assert!(error.is_retryable());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for front-panel operations.
pub type Result<T, E = ConnectError> = std::result::Result<T, E>;

/// Errors establishing a remote framebuffer session.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectError {
    #[error("Connection to {host}:{port} timed out after {timeout:?}")]
    Timeout { host: String, port: u16, timeout: Duration },

    #[error("Connection to {host}:{port} refused")]
    Refused {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol mismatch: {details}")]
    ProtocolMismatch { details: String },

    #[error("Authentication rejected by server: {reason}")]
    AuthRejected { reason: String },
}

impl ConnectError {
    /// Helper constructor for connect timeouts.
    pub fn timeout(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        ConnectError::Timeout { host: host.into(), port, timeout }
    }

    /// Helper constructor for refused/unreachable endpoints.
    pub fn refused(host: impl Into<String>, port: u16, source: std::io::Error) -> Self {
        ConnectError::Refused { host: host.into(), port, source }
    }

    /// Helper constructor for handshake-level incompatibilities.
    pub fn protocol_mismatch(details: impl Into<String>) -> Self {
        ConnectError::ProtocolMismatch { details: details.into() }
    }

    /// Helper constructor for rejected credentials.
    pub fn auth_rejected(reason: impl Into<String>) -> Self {
        ConnectError::AuthRejected { reason: reason.into() }
    }

    /// Returns whether retrying the connection could succeed without
    /// operator intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectError::Timeout { .. } => true,
            ConnectError::Refused { .. } => true,
            ConnectError::ProtocolMismatch { .. } => false,
            ConnectError::AuthRejected { .. } => false,
        }
    }
}

/// Wire-level protocol failures.
///
/// A malformed message leaves the byte stream at an unknown position, so
/// these are always fatal to the session that observed them: the run loop
/// transitions to `Failed` and stops reading.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("Malformed message in {context}: {details}")]
    MalformedMessage { context: String, details: String },

    #[error("I/O error during {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProtocolError {
    /// Helper constructor for decode failures with framing context.
    pub fn malformed(context: impl Into<String>, details: impl Into<String>) -> Self {
        ProtocolError::MalformedMessage { context: context.into(), details: details.into() }
    }

    /// Helper constructor for transport failures with operation context.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        ProtocolError::Io { operation: operation.into(), source }
    }
}

/// Poll-feed fetch failures.
///
/// Never fatal to the owning worker: the error is recorded in the worker's
/// status, prior data stays in place, and the next interval retries. The
/// interval itself throttles attempts, so there is no retry storm.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FetchError {
    #[error("Network error: {reason}")]
    Network {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Fetch timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },
}

impl FetchError {
    /// Helper constructor for network failures.
    pub fn network(reason: impl Into<String>) -> Self {
        FetchError::Network { reason: reason.into(), source: None }
    }

    /// Helper constructor for network failures with a source error.
    pub fn network_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        FetchError::Network { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for unparseable or inconsistent payloads.
    pub fn invalid_response(details: impl Into<String>) -> Self {
        FetchError::InvalidResponse { details: details.into() }
    }

    /// Returns whether this failure is transient.
    ///
    /// `InvalidResponse` usually indicates a firmware/shape mismatch that a
    /// retry will not fix, though the worker retries regardless.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::Timeout { .. } => true,
            FetchError::InvalidResponse { .. } => false,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::InvalidResponse { details: err.to_string() }
    }
}

impl From<quick_xml::DeError> for FetchError {
    fn from(err: quick_xml::DeError) -> Self {
        FetchError::InvalidResponse { details: err.to_string() }
    }
}

/// Input forwarding failures.
///
/// A single dropped input is recoverable; a broken transport is not, but
/// the transport failure surfaces through session state rather than here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InputError {
    #[error("Input bridge closed; session is no longer running")]
    Closed,
}
