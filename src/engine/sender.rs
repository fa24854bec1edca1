//! Sender side of the transfer state machine.
//!
//! Per file: announce metadata, encrypt the whole file as one AEAD
//! operation, then stream the combined `[nonce ‖ ciphertext]` buffer as
//! 16 KiB chunks. The chunk loop is the only point that suspends — it
//! yields while paused (locally or by the peer) and while the channel's
//! buffered amount exceeds the backpressure threshold, both as poll/backoff
//! waits with a fixed check interval.
//!
//! After every transmitted chunk the session record is persisted
//! (write-after-send), so a resumed or restarted sender continues from the
//! first unsent chunk and never retransmits. Restart reproducibility comes
//! from the persisted per-file nonce: re-encrypting the same plaintext under
//! it yields the byte-identical ciphertext stream.

use std::path::Path;

use bytes::Bytes;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::{
    BACKPRESSURE_HIGH, BACKPRESSURE_POLL_INTERVAL, CHUNK_SIZE, PAUSE_POLL_INTERVAL,
};
use crate::crypto::EncryptionKey;
use crate::engine::{emit, event_stream, EventSender, TransferControl, TransferEvent};
use crate::error::TransferError;
use crate::metrics::{ProgressSample, SpeedEstimator};
use crate::protocol::{ControlMessage, WireMessage};
use crate::session::{FileManifestEntry, FileState, SessionState};
use crate::store::{
    save_best_effort, HistoryRecord, HistoryStore, SessionStore, TransferDirection, TransferStatus,
};

// ── Input files ──────────────────────────────────────────────────────────────

/// One file queued for sending: its manifest entry plus the full plaintext.
///
/// The engine encrypts each file as a single AEAD operation, so the whole
/// plaintext is held in memory for the duration of that file's transfer.
pub struct SendFile {
    pub entry: FileManifestEntry,
    pub data: Vec<u8>,
}

impl SendFile {
    pub fn new(entry: FileManifestEntry, data: Vec<u8>) -> Self {
        Self { entry, data }
    }

    /// Read a file from disk, deriving name, size, and mime type from the
    /// path.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let entry = FileManifestEntry::from_path(path, data.len() as u64);
        Ok(Self { entry, data })
    }
}

// ── Sender ───────────────────────────────────────────────────────────────────

/// Drives the sending side of one session over a channel.
pub struct Sender<C: Channel> {
    channel: C,
    key: EncryptionKey,
    files: Vec<SendFile>,
    session: SessionState,
    store: Option<SessionStore>,
    history: Option<HistoryStore>,
    events: EventSender,
    control: TransferControl,
    /// Pause state last signaled to the peer, so `pause`/`resume` control
    /// messages are sent exactly once per transition.
    signaled_paused: bool,
}

impl<C: Channel> Sender<C> {
    /// Set up a fresh session over `files`, in the given order.
    ///
    /// Returns the sender, a control handle for pause/resume/abort, and the
    /// event stream for the consumer.
    pub fn new(
        channel: C,
        key: EncryptionKey,
        files: Vec<SendFile>,
    ) -> (
        Self,
        TransferControl,
        tokio::sync::mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let manifest: Vec<FileManifestEntry> =
            files.iter().map(|f| f.entry.clone()).collect();
        let session = SessionState::new(&manifest);
        Self::with_session(channel, key, files, session)
    }

    /// Resume a previously persisted session (same `sessionId`, loaded by
    /// the caller from a [`SessionStore`]). Chunk records marked sent are
    /// trusted without re-verification; streaming continues from the first
    /// unsent chunk of the first incomplete file.
    ///
    /// # Errors
    ///
    /// `InvalidKeyFormat` never arises here, but a manifest mismatch between
    /// `files` and the persisted record is rejected as corrupt storage.
    pub fn resume(
        channel: C,
        key: EncryptionKey,
        files: Vec<SendFile>,
        session: SessionState,
    ) -> Result<
        (
            Self,
            TransferControl,
            tokio::sync::mpsc::UnboundedReceiver<TransferEvent>,
        ),
        TransferError,
    > {
        if files.len() != session.files.len()
            || files
                .iter()
                .zip(&session.files)
                .any(|(f, s)| f.entry.name != s.file_name || f.entry.size != s.file_size)
        {
            return Err(TransferError::Storage(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "persisted session does not match the provided file set",
            )));
        }
        info!(
            event = "session_resume",
            session_id = %session.session_id,
            current_file = session.current_file_index,
            "Resuming persisted session"
        );
        Ok(Self::with_session(channel, key, files, session))
    }

    fn with_session(
        channel: C,
        key: EncryptionKey,
        files: Vec<SendFile>,
        session: SessionState,
    ) -> (
        Self,
        TransferControl,
        tokio::sync::mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let (events, event_rx) = event_stream();
        let control = TransferControl::new();
        if session.is_paused {
            // A session persisted while paused resumes paused; the consumer
            // decides when to continue.
            control.pause();
        }
        let sender = Self {
            channel,
            key,
            files,
            session,
            store: None,
            history: None,
            events,
            signaled_paused: false,
            control: control.clone(),
        };
        (sender, control, event_rx)
    }

    /// Attach a session store; the record is upserted after every chunk and
    /// every pause toggle, and deleted on successful completion.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a history sink for the terminal record.
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    /// Session identifier (for persistence and later resume).
    pub fn session_id(&self) -> uuid::Uuid {
        self.session.session_id
    }

    /// Run the session to completion: every file in manifest order,
    /// strictly sequentially.
    ///
    /// # Errors
    ///
    /// `ChannelNotReady` when called before the channel is open;
    /// `ChannelClosed` when the channel goes away mid-transfer. Any error is
    /// terminal for the session.
    pub async fn run(mut self) -> Result<(), TransferError> {
        if !self.channel.is_open() {
            return Err(TransferError::ChannelNotReady);
        }
        save_best_effort(self.store.as_ref(), &self.session).await;

        let mut estimator = SpeedEstimator::new();
        let session_total = self.session.total_bytes();

        while self.session.current_file_index < self.session.files.len() {
            match self.send_current_file(&mut estimator, session_total).await {
                Ok(()) => {}
                Err(TransferError::ChannelClosed) if self.control.is_aborted() => {
                    // Local cancellation: unsent chunk records stay
                    // sent=false so a later session can be restarted
                    // manually from metadata.
                    return self.finish_cancelled().await;
                }
                Err(e) => return self.finish_failed(e).await,
            }
        }

        self.finish_completed().await
    }

    // ── Per-file streaming ───────────────────────────────────────────────

    async fn send_current_file(
        &mut self,
        estimator: &mut SpeedEstimator,
        session_total: u64,
    ) -> Result<(), TransferError> {
        let index = self.session.current_file_index;
        let plaintext = &self.files[index].data;
        let entry = self.files[index].entry.clone();
        let fresh_file = self.session.files[index].completed_chunks == 0;

        // A file that already has transmitted chunks was announced before
        // the pause/restart; the peer is still accumulating it.
        if fresh_file {
            self.send_control(&ControlMessage::Metadata {
                name: entry.name.clone(),
                size: entry.size,
                mime_type: entry.mime_type.clone(),
            })
            .await?;
            emit(
                &self.events,
                TransferEvent::FileState {
                    file_index: index,
                    name: entry.name.clone(),
                    state: FileState::Announced,
                },
            );
        }

        // Whole-file AEAD. Reuse the persisted nonce on resume so the
        // ciphertext stream matches what the peer already holds.
        let combined = match self.session.files[index].nonce {
            Some(nonce) => self.key.encrypt_with_nonce(plaintext, &nonce)?,
            None => {
                let (combined, nonce) = self.key.encrypt(plaintext)?;
                self.session.files[index].nonce = Some(nonce);
                save_best_effort(self.store.as_ref(), &self.session).await;
                combined
            }
        };

        debug_assert_eq!(
            crate::pipeline::chunk_count(combined.len(), CHUNK_SIZE),
            self.session.files[index].total_chunks,
        );

        let start_chunk = self.session.files[index].first_unsent_chunk().unwrap_or(0);
        if start_chunk > 0 {
            debug!(
                event = "file_resume",
                file = %entry.name,
                start_chunk,
                "Skipping already-transmitted chunks"
            );
        }

        for (i, piece) in crate::pipeline::chunks(&combined, CHUNK_SIZE).enumerate() {
            let chunk_index = i as u32;
            if self.session.files[index].chunks[i].sent {
                continue;
            }

            self.wait_until_clear().await?;

            self.channel
                .send(WireMessage::Data(Bytes::copy_from_slice(piece)))
                .await?;
            self.session.mark_chunk_sent(chunk_index);
            save_best_effort(self.store.as_ref(), &self.session).await;

            self.emit_progress(index, estimator, session_total);
        }

        // Authoritative completion signal — the receiver finalizes only on
        // this, never on byte count.
        self.send_control(&ControlMessage::End).await?;

        self.session.complete_current_file();
        save_best_effort(self.store.as_ref(), &self.session).await;
        emit(
            &self.events,
            TransferEvent::FileState {
                file_index: index,
                name: entry.name,
                state: FileState::Completed,
            },
        );
        Ok(())
    }

    /// Suspend until the chunk may be sent: not paused, channel open, and
    /// buffered amount below the backpressure threshold.
    async fn wait_until_clear(&mut self) -> Result<(), TransferError> {
        loop {
            self.drain_inbound_control();

            if self.control.is_aborted() {
                return Err(TransferError::ChannelClosed);
            }
            if !self.channel.is_open() {
                return Err(TransferError::ChannelClosed);
            }

            if self.control.is_paused() {
                self.signal_pause_transition(true).await?;
                sleep(PAUSE_POLL_INTERVAL).await;
                continue;
            }
            self.signal_pause_transition(false).await?;

            if self.channel.buffered_amount() > BACKPRESSURE_HIGH {
                sleep(BACKPRESSURE_POLL_INTERVAL).await;
                continue;
            }
            return Ok(());
        }
    }

    /// Service inbound control messages between chunks. The peer's
    /// pause/resume requests land on the local pause flag, exactly as if
    /// the local consumer had toggled it.
    fn drain_inbound_control(&mut self) {
        while let Some(msg) = self.channel.try_recv() {
            match msg {
                WireMessage::Control(text) => match ControlMessage::decode(&text) {
                    Ok(ControlMessage::Pause) => {
                        info!(event = "peer_pause", "Peer requested pause");
                        self.control.pause();
                        emit(&self.events, TransferEvent::PeerPaused);
                    }
                    Ok(ControlMessage::Resume) => {
                        info!(event = "peer_resume", "Peer requested resume");
                        self.control.resume();
                        emit(&self.events, TransferEvent::PeerResumed);
                    }
                    Ok(other) => {
                        debug!(event = "unexpected_control", ?other, "Ignoring control message");
                    }
                    Err(e) => {
                        warn!(event = "control_decode_error", %e, "Undecodable control message");
                    }
                },
                WireMessage::Data(_) => {
                    warn!(event = "unexpected_data", "Ignoring data frame on sending side");
                }
            }
        }
    }

    /// Tell the peer about pause-state transitions, exactly once each, and
    /// persist the toggle.
    async fn signal_pause_transition(&mut self, paused: bool) -> Result<(), TransferError> {
        if paused == self.signaled_paused {
            return Ok(());
        }
        self.signaled_paused = paused;
        self.session.set_paused(paused);
        save_best_effort(self.store.as_ref(), &self.session).await;

        let (msg, state) = if paused {
            (ControlMessage::Pause, FileState::Paused)
        } else {
            (ControlMessage::Resume, FileState::Streaming)
        };
        self.send_control(&msg).await?;
        emit(
            &self.events,
            TransferEvent::FileState {
                file_index: self.session.current_file_index,
                name: self
                    .session
                    .current_file()
                    .map(|f| f.file_name.clone())
                    .unwrap_or_default(),
                state,
            },
        );
        Ok(())
    }

    fn emit_progress(&self, index: usize, estimator: &mut SpeedEstimator, session_total: u64) {
        let file = &self.session.files[index];
        let sent_bytes =
            (u64::from(file.completed_chunks) * CHUNK_SIZE as u64).min(file.file_size);
        let session_transferred = self.session.transferred_bytes();
        let speed_bps = estimator.record(session_transferred);
        let eta = estimator.eta(session_transferred, session_total);
        emit(
            &self.events,
            TransferEvent::Progress {
                file_index: index,
                sample: ProgressSample {
                    bytes_transferred: sent_bytes,
                    total_bytes: file.file_size,
                },
                speed_bps,
                eta,
                session_transferred,
                session_total,
            },
        );
    }

    async fn send_control(&self, msg: &ControlMessage) -> Result<(), TransferError> {
        self.channel.send(WireMessage::control(msg)?).await
    }

    // ── Terminal transitions ─────────────────────────────────────────────

    async fn finish_completed(self) -> Result<(), TransferError> {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(self.session.session_id).await {
                warn!(event = "session_delete_failed", %e);
            }
        }
        self.append_history(TransferStatus::Completed).await;
        info!(
            event = "session_completed",
            session_id = %self.session.session_id,
            files = self.session.total_files
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
            direction: TransferDirection::Sent,
            status,
            file_count: self.session.total_files,
        };
        if let Err(e) = history.append(&record).await {
            warn!(event = "history_append_failed", %e);
        }
    }
}
