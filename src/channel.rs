//! Channel adapter: the narrow seam between the engine and the transport.
//!
//! The engine assumes an ordered, reliable, message-oriented duplex channel
//! with a backpressure signal, and nothing more. NAT traversal, signaling,
//! and connection-state management belong to whatever implements this trait
//! (a WebRTC data channel, a QUIC stream, a local socket).
//!
//! [`MemoryChannel`] provides an in-process loopback pair used by the test
//! suite; its simulated buffered amount lets tests exercise the sender's
//! backpressure wait without a real transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::TransferError;
use crate::protocol::WireMessage;

/// The ordered reliable duplex message channel the engine is built on.
///
/// Message order preservation is delegated entirely to the implementation;
/// the engine performs no resequencing or deduplication.
#[allow(async_fn_in_trait)]
pub trait Channel {
    /// Whether the channel is currently open for sending.
    fn is_open(&self) -> bool;

    /// Outstanding bytes buffered by the transport but not yet delivered.
    /// The sender suspends while this exceeds the backpressure threshold.
    fn buffered_amount(&self) -> usize;

    /// Send one message.
    ///
    /// # Errors
    ///
    /// `ChannelNotReady` when the channel was never opened, `ChannelClosed`
    /// when it has been closed.
    async fn send(&self, msg: WireMessage) -> Result<(), TransferError>;

    /// Receive the next message, in delivery order. Returns `None` once the
    /// channel is closed and drained.
    async fn recv(&mut self) -> Option<WireMessage>;

    /// Non-blocking receive: returns a message only if one is already
    /// queued. Used by the send loop to service inbound control messages
    /// between chunks.
    fn try_recv(&mut self) -> Option<WireMessage>;

    /// Close the channel. Idempotent.
    fn close(&self);
}

// ── In-memory loopback ───────────────────────────────────────────────────────

/// One end of an in-process loopback channel pair.
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
    open: Arc<AtomicBool>,
    buffered: Arc<AtomicUsize>,
}

impl MemoryChannel {
    /// Create a connected pair of channel ends.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let a = Self {
            tx: tx_a,
            rx: rx_a,
            open: open.clone(),
            buffered: Arc::new(AtomicUsize::new(0)),
        };
        let b = Self {
            tx: tx_b,
            rx: rx_b,
            open,
            buffered: Arc::new(AtomicUsize::new(0)),
        };
        (a, b)
    }

    /// Handle for simulating transport backpressure from a test.
    pub fn buffered_handle(&self) -> Arc<AtomicUsize> {
        self.buffered.clone()
    }
}

impl Channel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    async fn send(&self, msg: WireMessage) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        self.tx.send(msg).map_err(|_| TransferError::ChannelClosed)
    }

    async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }

    fn try_recv(&mut self) -> Option<WireMessage> {
        self.rx.try_recv().ok()
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}
