//! Toolkit-agnostic core for remote printer front panels.
//!
//! Frontpanel talks to a device's embedded RFB server and its status
//! endpoints, and hands any UI layer clean, immutable data to render:
//!
//! - **Capture/control**: an async [`Session`] speaks RFB (RFC 6143) over
//!   TCP, assembles rectangle updates into immutable [`Frame`] snapshots,
//!   and forwards pointer/keyboard input back to the panel.
//! - **Background polling**: interval-driven workers fetch device alerts
//!   and supply telemetry (CDM JSON or LEDM XML), normalize them to typed
//!   records, and publish through ordered dispatch queues that a
//!   presentation layer polls on its own refresh cycle.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use frontpanel::{Endpoint, Frontpanel, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Endpoint::new("15.8.4.2", 5900);
//!     let session = Frontpanel::connect(endpoint).await?;
//!
//!     let mut frames = Box::pin(session.frame_stream(UpdateRate::Max(10)));
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {} ({}x{})", frame.seq, frame.width, frame.height);
//!     }
//!     Ok(())
//! }
//! ```

mod dispatch;
mod error;
#[cfg(test)]
pub mod test_utils;
pub mod types;

pub mod feeds;
pub mod poll;
pub mod rfb;
pub mod session;
pub mod stream;

pub use dispatch::{DispatchReceiver, DispatchSender, OverflowPolicy, dispatch_queue};
pub use error::{ConnectError, FetchError, InputError, ProtocolError, Result};
pub use poll::{Fetch, PollConfig, PollHandle, PollStatus, PollSupervisor, PollWorker};
pub use session::Session;
pub use types::*;

/// Unified entry point.
///
/// Thin facade over [`Session`] and [`PollSupervisor`] for callers that
/// prefer a single import.
///
/// # Examples
///
/// ```rust,no_run
/// use frontpanel::{Endpoint, Frontpanel};
///
/// #[tokio::main]
/// async fn main() -> frontpanel::Result<()> {
///     let session = Frontpanel::connect(Endpoint::new("15.8.4.2", 5900)).await?;
///     session.stop();
///     Ok(())
/// }
/// ```
pub struct Frontpanel;

impl Frontpanel {
    /// Open a capture/control session against a panel endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] when the endpoint is unreachable, the
    /// handshake times out, the server speaks something other than RFB, or
    /// authentication is rejected.
    pub async fn connect(endpoint: Endpoint) -> Result<Session> {
        Session::connect(endpoint).await
    }

    /// A supervisor for the background device feeds, initially idle.
    pub fn poll_supervisor() -> PollSupervisor {
        PollSupervisor::new()
    }
}
