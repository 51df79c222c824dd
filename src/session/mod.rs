//! Remote front-panel capture session.
//!
//! A [`Session`] owns one RFB connection: the handshake runs inside
//! `connect`, then a spawned run loop reads and decodes server messages,
//! maintains the shadow framebuffer, and publishes immutable snapshots.
//! Input events flow the other way through the input bridge. All state is
//! surfaced through watch channels; nothing here touches a UI toolkit.

mod assembler;
mod input;
mod transport;

use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::dispatch::{DispatchReceiver, DispatchSender, OverflowPolicy, dispatch_queue};
use crate::error::{ConnectError, InputError, Result};
use crate::rfb::wire::{self, ServerMessage};
use crate::rfb::PixelFormat;
use crate::stream::ThrottleExt;
use crate::types::{Endpoint, Frame, FrameFormat, InputEvent, SessionState, UpdateRate};

use assembler::FrameAssembler;
use input::InputBridge;
use transport::Transport;

/// Default bound on TCP connect + handshake I/O.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read tick: the run loop wakes at least this often to observe `stop()`.
const READ_TICK: Duration = Duration::from_millis(250);

/// Frame queue depth. A consumer a few frames behind only cares about the
/// newest screen states, so the queue stays small and drops from the front.
const FRAME_QUEUE_DEPTH: usize = 8;

/// Nominal panel refresh ceiling used to normalize requested stream rates.
const NOMINAL_UPDATE_HZ: f64 = 30.0;

/// A live capture/control session against one remote front panel.
///
/// Dropping the session cancels its tasks and closes the transport.
pub struct Session {
    endpoint: Endpoint,
    state_rx: watch::Receiver<SessionState>,
    frame_rx: watch::Receiver<Option<Frame>>,
    frame_queue: DispatchReceiver<Frame>,
    input: InputBridge,
    cancel: CancellationToken,
}

impl Session {
    /// Connect with the default timeout.
    pub async fn connect(endpoint: Endpoint) -> Result<Self> {
        Self::connect_with_timeout(endpoint, CONNECT_TIMEOUT).await
    }

    /// Connect to the endpoint and complete the RFB handshake.
    ///
    /// On success the run loop is already requesting framebuffer updates;
    /// the first snapshot arrives as soon as the server answers.
    pub async fn connect_with_timeout(
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Result<Self> {
        info!(endpoint = %endpoint, "connecting capture session");
        let (state_tx, state_rx) = watch::channel(SessionState::Handshaking);

        // One bound covers the TCP connect and the whole handshake, so a
        // server that accepts but never speaks still fails within `timeout`.
        let negotiated = tokio::time::timeout(timeout, async {
            let transport = Transport::connect(&endpoint, timeout).await?;
            transport.handshake().await
        })
        .await
        .map_err(|_| ConnectError::timeout(&endpoint.host, endpoint.port, timeout))??;

        // Keep the server's native format when we can represent it,
        // otherwise pin the stream to 32-bit true colour.
        let server_format = negotiated.init.pixel_format;
        let (pixel_format, frame_format) = match server_format.frame_format() {
            Some(format) => (server_format, format),
            None => (PixelFormat::rgba32(), FrameFormat::Rgba32),
        };

        let (frame_tx, frame_rx) = watch::channel(None);
        let (queue_tx, frame_queue) =
            dispatch_queue("frames", OverflowPolicy::DropOldest(FRAME_QUEUE_DEPTH));
        let cancel = CancellationToken::new();

        let input = InputBridge::start(negotiated.write_half, cancel.clone());
        // Pin the format, advertise encodings, ask for the first full frame.
        input
            .send_control(transport::post_handshake_messages(
                &pixel_format,
                negotiated.init.width,
                negotiated.init.height,
            ))
            .map_err(|_| ConnectError::protocol_mismatch("transport closed after handshake"))?;

        let assembler =
            FrameAssembler::new(negotiated.init.width, negotiated.init.height, frame_format);
        let run = RunLoop {
            read_half: negotiated.read_half,
            assembler,
            pixel_format,
            state_tx,
            frame_tx,
            queue_tx,
            input: input.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(run.run());

        Ok(Self { endpoint, state_rx, frame_rx, frame_queue, input, cancel })
    }

    /// The endpoint this session was opened against.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch-backed stream of state transitions, starting with the current
    /// state.
    pub fn state_changes(&self) -> impl Stream<Item = SessionState> + 'static {
        WatchStream::new(self.state_rx.clone())
    }

    /// Latest complete snapshot, or `None` before the first update.
    ///
    /// After a failure this keeps returning the last good snapshot.
    pub fn current_frame(&self) -> Option<Frame> {
        self.frame_rx.borrow().clone()
    }

    /// Ordered snapshot feed for consumers that poll on their own cycle.
    /// Bounded; a slow consumer loses the oldest snapshots, never the newest.
    pub fn frames(&self) -> DispatchReceiver<Frame> {
        self.frame_queue.clone()
    }

    /// Async stream of snapshots, optionally rate-limited with latest-wins
    /// throttling. The stream ends when the session stops or fails.
    pub fn frame_stream(&self, rate: UpdateRate) -> impl Stream<Item = Frame> + 'static {
        // Skip the initial None while waiting for the first update, then
        // treat any later None as end-of-stream (the run loop never
        // publishes None after the first frame, so this only fires if the
        // watch sender is gone).
        let frames = WatchStream::new(self.frame_rx.clone())
            .skip_while(|opt| {
                let is_none = opt.is_none();
                async move { is_none }
            })
            .filter_map(|opt| async move { opt });

        let rate = match rate {
            UpdateRate::Max(0) => UpdateRate::Max(1),
            other => other,
        };
        match rate.throttle_interval(NOMINAL_UPDATE_HZ) {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }

    /// Forward a local input event to the remote panel.
    ///
    /// Non-blocking; pointer motion is coalesced latest-wins, button and
    /// key events are delivered exactly once in submission order.
    pub fn send_input(&self, event: InputEvent) -> Result<(), InputError> {
        self.input.submit(event)
    }

    /// Request a cooperative shutdown. Idempotent; the run loop observes
    /// the cancellation within one read tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Completes once the session reaches a terminal state.
    pub async fn stopped(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            if rx.borrow().is_terminal() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(endpoint = %self.endpoint, "dropping session");
        self.cancel.cancel();
    }
}

struct RunLoop {
    read_half: OwnedReadHalf,
    assembler: FrameAssembler,
    pixel_format: PixelFormat,
    state_tx: watch::Sender<SessionState>,
    frame_tx: watch::Sender<Option<Frame>>,
    queue_tx: DispatchSender<Frame>,
    input: InputBridge,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn run(mut self) {
        let _ = self.state_tx.send(SessionState::Connected);
        info!("session run loop started");

        let mut buf = BytesMut::with_capacity(64 * 1024);
        let mut frames_published = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                let _ = self.state_tx.send(SessionState::Closing);
                break;
            }

            // Bounded read so cancellation is observed within READ_TICK even
            // on a silent link.
            match tokio::time::timeout(READ_TICK, self.read_half.read_buf(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(0)) => {
                    self.fail("remote closed connection");
                    return;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.fail(&format!("transport read failed: {e}"));
                    return;
                }
            }

            loop {
                match wire::decode_server_message(&buf, &self.pixel_format) {
                    Ok(None) => break,
                    Ok(Some((message, consumed))) => {
                        buf.advance(consumed);
                        if let Err(reason) = self.handle(message, &mut frames_published) {
                            self.fail(&reason);
                            return;
                        }
                    }
                    Err(e) => {
                        self.fail(&e.to_string());
                        return;
                    }
                }
            }
        }

        info!(frames = frames_published, "session run loop ended");
        let _ = self.state_tx.send(SessionState::Disconnected);
    }

    fn handle(&mut self, message: ServerMessage, published: &mut u64) -> Result<(), String> {
        match message {
            ServerMessage::FramebufferUpdate(rects) => {
                self.assembler.apply(&rects).map_err(|e| e.to_string())?;
                let frame = self.assembler.snapshot().map_err(|e| e.to_string())?;
                *published += 1;
                trace!(seq = frame.seq, rects = rects.len(), "snapshot published");
                self.queue_tx.send(frame.clone());
                let _ = self.frame_tx.send(Some(frame));

                // Ask for the next delta right away; the server answers when
                // something changes.
                let width = u16::try_from(self.assembler.width()).unwrap_or(u16::MAX);
                let height = u16::try_from(self.assembler.height()).unwrap_or(u16::MAX);
                let request =
                    wire::framebuffer_update_request(true, 0, 0, width, height);
                if self.input.send_control(request.to_vec()).is_err() {
                    // During a cooperative stop the writer task closes the
                    // bridge before the run loop drains its buffer; that is
                    // not a failure, the loop exits via the Closing path.
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                    return Err("outbound channel closed".to_string());
                }
            }
            ServerMessage::ColourMapEntries { first_colour, colours } => {
                debug!(first_colour, entries = colours.len(), "colour map updated");
            }
            ServerMessage::Bell => debug!("bell from remote panel"),
            ServerMessage::CutText(text) => {
                debug!(len = text.len(), "cut text from remote panel");
            }
        }
        Ok(())
    }

    fn fail(&self, reason: &str) {
        error!(reason, "session failed");
        // The last good frame stays in the watch channel on purpose.
        let _ = self.state_tx.send(SessionState::Failed(reason.to_string()));
        self.cancel.cancel();
    }
}
