//! Input bridge: local events out to the remote panel.
//!
//! Producers (UI thread, run loop) push into shared state; a dedicated
//! writer task owns the transport write half and drains in order. Pointer
//! motion occupies a single slot where the latest position wins, so a
//! flood of mouse moves never backs up behind a slow link. Button and key
//! events are queued FIFO and never dropped; submitting one first demotes
//! any pending motion into the FIFO so relative order is preserved.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::InputError;
use crate::rfb::wire;
use crate::types::InputEvent;

#[derive(Default)]
struct OutboundState {
    /// Protocol messages from the run loop (update requests), sent verbatim.
    control: VecDeque<Vec<u8>>,
    /// Latest-wins pointer motion slot.
    pending_move: Option<(u16, u16)>,
    /// Button and key events, FIFO.
    discrete: VecDeque<InputEvent>,
    /// Currently held buttons, RFB mask bits.
    button_mask: u8,
    closed: bool,
}

impl OutboundState {
    fn push(&mut self, event: InputEvent) -> Result<(), InputError> {
        if self.closed {
            return Err(InputError::Closed);
        }
        match event {
            InputEvent::PointerMove { x, y } => {
                self.pending_move = Some((x, y));
            }
            other => {
                // Motion submitted before this event must reach the wire
                // before it; demote the slot into the FIFO.
                if let Some((x, y)) = self.pending_move.take() {
                    self.discrete.push_back(InputEvent::PointerMove { x, y });
                }
                self.discrete.push_back(other);
            }
        }
        Ok(())
    }

    fn push_control(&mut self, bytes: Vec<u8>) -> Result<(), InputError> {
        if self.closed {
            return Err(InputError::Closed);
        }
        self.control.push_back(bytes);
        Ok(())
    }

    /// Encode everything pending into one wire batch. Order: control
    /// messages, then discrete events, then the coalesced motion slot.
    /// Anything in the slot was submitted after every queued discrete
    /// event (earlier motion gets demoted on discrete push), so the slot
    /// goes last.
    fn take_batch(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for msg in self.control.drain(..) {
            out.extend_from_slice(&msg);
        }
        for event in self.discrete.drain(..) {
            match event {
                InputEvent::PointerMove { x, y } => {
                    out.extend_from_slice(&wire::pointer_event(self.button_mask, x, y));
                }
                InputEvent::PointerButton { x, y, button, pressed } => {
                    if pressed {
                        self.button_mask |= button.mask_bit();
                    } else {
                        self.button_mask &= !button.mask_bit();
                    }
                    out.extend_from_slice(&wire::pointer_event(self.button_mask, x, y));
                }
                InputEvent::Key { keysym, pressed } => {
                    out.extend_from_slice(&wire::key_event(keysym, pressed));
                }
            }
        }
        if let Some((x, y)) = self.pending_move.take() {
            out.extend_from_slice(&wire::pointer_event(self.button_mask, x, y));
        }
        out
    }
}

struct Shared {
    state: Mutex<OutboundState>,
    notify: Notify,
}

/// Handle for submitting outbound traffic. Cheap to clone.
#[derive(Clone)]
pub struct InputBridge {
    shared: Arc<Shared>,
}

impl InputBridge {
    /// Spawn the writer task over the transport write half.
    pub fn start<W>(writer: W, cancel: CancellationToken) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(OutboundState::default()),
            notify: Notify::new(),
        });
        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            writer_task(task_shared, writer, cancel).await;
        });
        Self { shared }
    }

    /// Submit a local input event. Non-blocking; pointer motion coalesces.
    pub fn submit(&self, event: InputEvent) -> Result<(), InputError> {
        self.lock().push(event)?;
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Queue a pre-encoded protocol message (update requests).
    pub fn send_control(&self, bytes: Vec<u8>) -> Result<(), InputError> {
        self.lock().push_control(bytes)?;
        self.shared.notify.notify_one();
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutboundState> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn writer_task<W>(shared: Arc<Shared>, mut writer: W, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin + Send,
{
    debug!("input writer task started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.notify.notified() => {}
        }

        // Take the batch under the lock, write outside it.
        let batch = match shared.state.lock() {
            Ok(mut guard) => guard.take_batch(),
            Err(poisoned) => poisoned.into_inner().take_batch(),
        };
        if batch.is_empty() {
            continue;
        }
        trace!(bytes = batch.len(), "writing outbound batch");
        if let Err(e) = writer.write_all(&batch).await {
            // The read side will observe the broken transport and fail the
            // session; here we just stop accepting further input.
            warn!(error = %e, "outbound write failed, closing input bridge");
            break;
        }
    }

    if let Ok(mut guard) = shared.state.lock() {
        guard.closed = true;
    }
    debug!("input writer task ended");
}
