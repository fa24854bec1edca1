//! Receiver side of the transfer state machine.
//!
//! Purely reactive: every inbound message is handled as the channel
//! delivers it, in delivery order, with no resequencing. `metadata` resets
//! the per-file accumulation, binary frames append to it, and `end` is the
//! only thing that finalizes a file — declared sizes are peer-supplied and
//! never used as a completion oracle.
//!
//! Finalization splits the accumulated buffer into nonce and ciphertext and
//! decrypts. Authentication failure is terminal for the file and aborts the
//! session; the peer would have to start over with a fresh key exchange.
//! Partially received buffers are discarded on failure, never surfaced.

use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::PAUSE_POLL_INTERVAL;
use crate::crypto::EncryptionKey;
use crate::engine::{emit, event_stream, EventSender, ReceivedFile, TransferControl, TransferEvent};
use crate::error::TransferError;
use crate::metrics::{ProgressSample, SpeedEstimator};
use crate::pipeline::Reassembler;
use crate::protocol::{ControlMessage, WireMessage};
use crate::session::{FileManifestEntry, FileState, FileTransferState, SessionState};
use crate::store::{
    save_best_effort, HistoryRecord, HistoryStore, SessionStore, TransferDirection, TransferStatus,
};

/// In-flight accumulation for the file currently being received.
struct CurrentFile {
    entry: FileManifestEntry,
    reassembler: Reassembler,
    /// Arrival-order chunk counter; doubles as the next chunk index in the
    /// session record.
    chunks_received: u32,
}

/// Drives the receiving side of one session over a channel.
///
/// The receiver builds its own session view incrementally — each `metadata`
/// message appends a file — and persists it after every chunk, mirroring
/// the sender. It has no timeout: a paused peer is waited for indefinitely,
/// bounded only by the persisted-state retention window.
pub struct Receiver<C: Channel> {
    channel: C,
    key: EncryptionKey,
    session: SessionState,
    current: Option<CurrentFile>,
    store: Option<SessionStore>,
    history: Option<HistoryStore>,
    events: EventSender,
    control: TransferControl,
    /// Pause state last signaled to the peer.
    signaled_paused: bool,
    estimator: SpeedEstimator,
}

impl<C: Channel> Receiver<C> {
    /// Set up the receiving end. The manifest is not known upfront; files
    /// are announced one at a time by the peer.
    pub fn new(
        channel: C,
        key: EncryptionKey,
    ) -> (
        Self,
        TransferControl,
        tokio::sync::mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let (events, event_rx) = event_stream();
        let control = TransferControl::new();
        let receiver = Self {
            channel,
            key,
            session: SessionState::new(&[]),
            current: None,
            store: None,
            history: None,
            events,
            control: control.clone(),
            signaled_paused: false,
            estimator: SpeedEstimator::new(),
        };
        (receiver, control, event_rx)
    }

    /// Attach a session store for the receiver's own session view.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a history sink for the terminal record.
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session.session_id
    }

    /// Receive until the peer closes the channel.
    ///
    /// Returns `Ok` when the channel closed with no file mid-receive (the
    /// session is then complete from this side's point of view); fails with
    /// `ChannelClosed` when it closed mid-file, discarding the partial
    /// buffer.
    pub async fn run(mut self) -> Result<(), TransferError> {
        loop {
            // The receive path never blocks on anything but the channel;
            // the periodic tick only services local pause/abort toggles so
            // the peer hears about them promptly.
            let msg = tokio::select! {
                msg = self.channel.recv() => msg,
                () = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {
                    if self.control.is_aborted() {
                        return self.finish_cancelled().await;
                    }
                    if let Err(e) = self.signal_pause_transition().await {
                        return self.finish_failed(e).await;
                    }
                    continue;
                }
            };

            let Some(msg) = msg else {
                // Channel closed. Mid-file, that is a failure; between
                // files it is the normal end of the session.
                if self.current.is_some() {
                    return self.finish_failed(TransferError::ChannelClosed).await;
                }
                return self.finish_completed().await;
            };

            let outcome = match msg {
                WireMessage::Control(text) => self.handle_control(&text).await,
                WireMessage::Data(chunk) => self.handle_chunk(&chunk).await,
            };
            if let Err(e) = outcome {
                return self.finish_failed(e).await;
            }
        }
    }

    // ── Message handlers ─────────────────────────────────────────────────

    async fn handle_control(&mut self, text: &str) -> Result<(), TransferError> {
        match ControlMessage::decode(text) {
            Ok(ControlMessage::Metadata {
                name,
                size,
                mime_type,
            }) => self.handle_metadata(FileManifestEntry::new(name, size, mime_type)).await,
            Ok(ControlMessage::End) => self.handle_end().await,
            Ok(ControlMessage::Pause) => {
                info!(event = "peer_pause", "Peer paused the transfer");
                self.session.set_paused(true);
                save_best_effort(self.store.as_ref(), &self.session).await;
                emit(&self.events, TransferEvent::PeerPaused);
                Ok(())
            }
            Ok(ControlMessage::Resume) => {
                info!(event = "peer_resume", "Peer resumed the transfer");
                self.session.set_paused(false);
                save_best_effort(self.store.as_ref(), &self.session).await;
                emit(&self.events, TransferEvent::PeerResumed);
                Ok(())
            }
            Err(e) => {
                warn!(event = "control_decode_error", %e, "Undecodable control message");
                Ok(())
            }
        }
    }

    async fn handle_metadata(&mut self, entry: FileManifestEntry) -> Result<(), TransferError> {
        if let Some(dropped) = self.current.take() {
            // A new announcement mid-file discards the stale accumulation.
            warn!(
                event = "metadata_resets_file",
                dropped = %dropped.entry.name,
                bytes = dropped.reassembler.len(),
                "New metadata arrived before end-of-file; dropping partial buffer"
            );
            self.session.fail_current_file();
        }

        debug!(
            event = "file_announced",
            name = %entry.name,
            size = entry.size,
            mime = %entry.mime_type
        );

        let file_index = self.session.files.len();
        self.session.files.push(FileTransferState::new(&entry));
        self.session.total_files = self.session.files.len();
        self.session.current_file_index = file_index;
        self.session.is_completed = false;
        save_best_effort(self.store.as_ref(), &self.session).await;

        emit(
            &self.events,
            TransferEvent::FileState {
                file_index,
                name: entry.name.clone(),
                state: FileState::Announced,
            },
        );

        self.current = Some(CurrentFile {
            reassembler: Reassembler::with_declared_size(entry.size),
            entry,
            chunks_received: 0,
        });
        Ok(())
    }

    async fn handle_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        let Some(current) = self.current.as_mut() else {
            warn!(
                event = "chunk_before_metadata",
                bytes = chunk.len(),
                "Data frame with no announced file; dropping"
            );
            return Ok(());
        };

        current.reassembler.push(chunk);
        let chunk_index = current.chunks_received;
        current.chunks_received += 1;

        let declared = current.entry.size;
        let accumulated = (current.reassembler.len() as u64).min(declared);

        self.session.mark_chunk_sent(chunk_index);
        save_best_effort(self.store.as_ref(), &self.session).await;

        let session_transferred = self.session.transferred_bytes();
        let session_total = self.session.total_bytes();
        let speed_bps = self.estimator.record(session_transferred);
        let eta = self.estimator.eta(session_transferred, session_total);
        emit(
            &self.events,
            TransferEvent::Progress {
                file_index: self.session.current_file_index,
                sample: ProgressSample {
                    bytes_transferred: accumulated,
                    total_bytes: declared,
                },
                speed_bps,
                eta,
                session_transferred,
                session_total,
            },
        );
        Ok(())
    }

    async fn handle_end(&mut self) -> Result<(), TransferError> {
        let Some(current) = self.current.take() else {
            warn!(event = "end_without_file", "End signal with no announced file; ignoring");
            return Ok(());
        };

        let file_index = self.session.current_file_index;
        let combined = current.reassembler.finish()?;
        let data = self.key.decrypt(&combined)?;

        self.session.complete_current_file();
        save_best_effort(self.store.as_ref(), &self.session).await;

        info!(
            event = "file_received",
            name = %current.entry.name,
            bytes = data.len()
        );
        emit(
            &self.events,
            TransferEvent::FileState {
                file_index,
                name: current.entry.name.clone(),
                state: FileState::Completed,
            },
        );
        emit(
            &self.events,
            TransferEvent::FileReceived(ReceivedFile {
                entry: current.entry,
                data,
            }),
        );
        Ok(())
    }

    /// Tell the peer about local pause-state transitions exactly once each.
    async fn signal_pause_transition(&mut self) -> Result<(), TransferError> {
        let paused = self.control.is_paused();
        if paused == self.signaled_paused {
            return Ok(());
        }
        self.signaled_paused = paused;
        let msg = if paused {
            ControlMessage::Pause
        } else {
            ControlMessage::Resume
        };
        self.channel.send(WireMessage::control(&msg)?).await
    }

    // ── Terminal transitions ─────────────────────────────────────────────

    async fn finish_completed(self) -> Result<(), TransferError> {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(self.session.session_id).await {
                warn!(event = "session_delete_failed", %e);
            }
        }
        if !self.session.files.is_empty() {
            self.append_history(TransferStatus::Completed).await;
        }
        info!(
            event = "session_completed",
            session_id = %self.session.session_id,
            files = self.session.files.len()
        );
        emit(
            &self.events,
            TransferEvent::SessionCompleted {
                session_id: self.session.session_id,
            },
        );
        Ok(())
    }

    async fn finish_failed(mut self, error: TransferError) -> Result<(), TransferError> {
        // Partial buffers are discarded, never surfaced as a file.
        self.current = None;
        self.session.fail_current_file();
        save_best_effort(self.store.as_ref(), &self.session).await;
        self.append_history(TransferStatus::Failed).await;
        warn!(
            event = "session_failed",
            session_id = %self.session.session_id,
            %error
        );
        emit(
            &self.events,
            TransferEvent::SessionFailed {
                session_id: self.session.session_id,
                reason: error.to_string(),
            },
        );
        Err(error)
    }

    async fn finish_cancelled(mut self) -> Result<(), TransferError> {
        self.current = None;
        self.session.fail_current_file();
        save_best_effort(self.store.as_ref(), &self.session).await;
        self.append_history(TransferStatus::Cancelled).await;
        info!(event = "session_cancelled", session_id = %self.session.session_id);
        emit(
            &self.events,
            TransferEvent::SessionFailed {
                session_id: self.session.session_id,
                reason: "cancelled".into(),
            },
        );
        self.channel.close();
        Ok(())
    }

    async fn append_history(&self, status: TransferStatus) {
        let Some(history) = &self.history else {
            return;
        };
        let record = HistoryRecord {
            id: self.session.session_id,
            file_name: self
                .session
                .files
                .first()
                .map(|f| f.file_name.clone())
                .unwrap_or_default(),
            file_size: self.session.total_bytes(),
            timestamp: chrono::Utc::now(),
            direction: TransferDirection::Received,
            status,
            file_count: self.session.files.len(),
        };
        if let Err(e) = history.append(&record).await {
            warn!(event = "history_append_failed", %e);
        }
    }
}
