//! Transfer state machine: orchestrates metadata announcement, chunk
//! streaming, and completion signaling per file across a file set.
//!
//! One [`Sender`] and one [`Receiver`] face each other over a [`Channel`].
//! Each drives its own side of the protocol and persists its own session
//! view; neither shares mutable state with the peer.
//!
//! Progress and lifecycle notifications are not callbacks: both sides hand
//! the caller an `mpsc::UnboundedReceiver<TransferEvent>` at construction
//! time and push into it as the transfer proceeds.
//!
//! [`Channel`]: crate::channel::Channel

pub mod receiver;
pub mod sender;

pub use receiver::Receiver;
pub use sender::{SendFile, Sender};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::{Eta, ProgressSample};
use crate::session::{FileManifestEntry, FileState};

// ── Events ───────────────────────────────────────────────────────────────────

/// A fully reconstructed, decrypted file surfaced by the receiver.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub entry: FileManifestEntry,
    pub data: Vec<u8>,
}

/// Notifications produced by the engine for the consumer to pull.
#[derive(Debug)]
pub enum TransferEvent {
    /// A file entered a new lifecycle state.
    FileState {
        file_index: usize,
        name: String,
        state: FileState,
    },
    /// Progress tick, emitted on every chunk event.
    Progress {
        file_index: usize,
        sample: ProgressSample,
        /// Advisory instantaneous speed, bytes/second.
        speed_bps: f64,
        /// Advisory estimated time to session completion.
        eta: Eta,
        /// Aggregate transferred bytes across the session (monotonic).
        session_transferred: u64,
        session_total: u64,
    },
    /// The remote peer paused its side of the transfer.
    PeerPaused,
    /// The remote peer resumed.
    PeerResumed,
    /// Receiver only: a file was reconstructed and authenticated.
    FileReceived(ReceivedFile),
    /// Every file in the session completed.
    SessionCompleted { session_id: Uuid },
    /// The session reached the terminal failed state.
    SessionFailed { session_id: Uuid, reason: String },
}

pub(crate) type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Create the event stream handed to the consumer.
pub(crate) fn event_stream() -> (EventSender, mpsc::UnboundedReceiver<TransferEvent>) {
    mpsc::unbounded_channel()
}

pub(crate) fn emit(tx: &EventSender, event: TransferEvent) {
    // A consumer that dropped its receiver simply stops observing; the
    // transfer itself keeps going.
    let _ = tx.send(event);
}

// ── Local control handle ─────────────────────────────────────────────────────

/// Handle for pausing, resuming, and aborting a transfer from outside the
/// engine task. Cheap to clone; shared flags, no locking.
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    paused: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
}

impl TransferControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request the local send loop to suspend after the in-flight chunk.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Clear the pause request.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Abort the transfer. Terminal; the session transitions to failed and
    /// partially received buffers are discarded.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}
