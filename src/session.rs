//! Resumable session state: the persisted description of an in-flight
//! multi-file transfer.
//!
//! A session covers one or more files, transferred strictly in manifest
//! order. Each file tracks a dense sequence of [`ChunkRecord`]s; the first
//! unsent record is where a resumed transfer continues. The whole structure
//! serializes to a single JSON record keyed by `sessionId` (camelCase field
//! names on disk), mutated after every chunk and every pause/resume toggle.
//!
//! The encryption key is deliberately absent — it lives only in volatile
//! session memory. The per-file AEAD nonce *is* persisted (it is a public
//! value) so a restarted sender can reproduce the identical ciphertext
//! stream for chunks the peer already holds.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{CHUNK_SIZE, NONCE_LEN};
use crate::pipeline::{chunk_count, ChunkRecord};

// ── Manifest ─────────────────────────────────────────────────────────────────

/// One file in a transfer manifest. Immutable once announced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifestEntry {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileManifestEntry {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }

    /// Build an entry from a path, guessing the mime type from the
    /// extension (`application/octet-stream` when unknown).
    pub fn from_path(path: &Path, size: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned();
        Self {
            name,
            size,
            mime_type,
        }
    }
}

// ── Per-file lifecycle ───────────────────────────────────────────────────────

/// Observable lifecycle of one file transfer.
///
/// `Announced → Streaming → (Paused ⇄ Streaming)* → Finalizing → Completed`,
/// with `Failed` terminal from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Announced,
    Streaming,
    Paused,
    Finalizing,
    Completed,
    Failed,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ── Per-file transfer state ──────────────────────────────────────────────────

/// Progress of a single file within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferState {
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    /// Dense, zero-based chunk records over the *encrypted* stream
    /// (`[nonce ‖ ciphertext]`), so `total_chunks` accounts for the nonce
    /// and the 16-byte auth tag.
    pub chunks: Vec<ChunkRecord>,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub is_paused: bool,
    pub is_completed: bool,
    /// AEAD nonce used for this file, set when the sender first encrypts.
    /// Absent on the receiving side and before streaming starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<[u8; NONCE_LEN]>,
    /// Set when the file reached the terminal `Failed` state.
    #[serde(default)]
    pub failed: bool,
}

impl FileTransferState {
    /// Initialize tracking for a manifest entry. Chunk count covers the
    /// encrypted stream: nonce + ciphertext + tag.
    pub fn new(entry: &FileManifestEntry) -> Self {
        let encrypted_len = encrypted_stream_len(entry.size);
        let total_chunks = chunk_count(encrypted_len, CHUNK_SIZE);
        Self {
            file_id: Uuid::new_v4(),
            file_name: entry.name.clone(),
            file_size: entry.size,
            mime_type: entry.mime_type.clone(),
            chunks: ChunkRecord::sequence(total_chunks),
            total_chunks,
            completed_chunks: 0,
            is_paused: false,
            is_completed: false,
            nonce: None,
            failed: false,
        }
    }

    /// Manifest entry this file was announced with.
    pub fn manifest_entry(&self) -> FileManifestEntry {
        FileManifestEntry::new(self.file_name.clone(), self.file_size, self.mime_type.clone())
    }

    /// Mark one chunk as transmitted. Idempotent per index; keeps
    /// `completed_chunks` equal to the number of sent records.
    pub fn mark_chunk_sent(&mut self, chunk_index: u32) {
        if let Some(record) = self.chunks.get_mut(chunk_index as usize) {
            if !record.sent {
                record.sent = true;
                self.completed_chunks += 1;
            }
        }
    }

    /// First unsent chunk index — where a resumed transfer continues.
    pub fn first_unsent_chunk(&self) -> Option<u32> {
        ChunkRecord::first_unsent(&self.chunks)
    }

    /// Whether every chunk record is marked sent.
    pub fn all_chunks_sent(&self) -> bool {
        self.completed_chunks == self.total_chunks
    }

    /// Current observable state.
    pub fn state(&self) -> FileState {
        if self.failed {
            FileState::Failed
        } else if self.is_completed {
            FileState::Completed
        } else if self.is_paused {
            FileState::Paused
        } else if self.all_chunks_sent() && self.total_chunks > 0 {
            FileState::Finalizing
        } else if self.completed_chunks > 0 {
            FileState::Streaming
        } else {
            FileState::Announced
        }
    }
}

/// Length of the encrypted stream for a plaintext of `size` bytes:
/// 12-byte nonce + ciphertext (same length as plaintext) + 16-byte tag.
pub fn encrypted_stream_len(size: u64) -> usize {
    NONCE_LEN + size as usize + 16
}

// ── Session ──────────────────────────────────────────────────────────────────

/// The persisted, resumable description of a multi-file transfer.
///
/// Invariants, upheld by the mutators here:
/// - `files[i].completed_chunks` equals the count of sent records;
/// - `is_completed` implies every file is completed;
/// - `current_file_index` points at the first incomplete file, or
///   past-the-end when all are completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: Uuid,
    /// Transfer order — files are sent strictly in this order.
    pub files: Vec<FileTransferState>,
    pub current_file_index: usize,
    pub total_files: usize,
    pub is_paused: bool,
    pub is_completed: bool,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl SessionState {
    /// Start tracking a fresh session over `manifest`, in manifest order.
    pub fn new(manifest: &[FileManifestEntry]) -> Self {
        let now = Utc::now();
        let files: Vec<FileTransferState> =
            manifest.iter().map(FileTransferState::new).collect();
        Self {
            session_id: Uuid::new_v4(),
            total_files: files.len(),
            files,
            current_file_index: 0,
            is_paused: false,
            is_completed: false,
            start_time: now,
            last_update_time: now,
        }
    }

    /// The file currently being transferred, if any remain.
    pub fn current_file(&self) -> Option<&FileTransferState> {
        self.files.get(self.current_file_index)
    }

    pub fn current_file_mut(&mut self) -> Option<&mut FileTransferState> {
        self.files.get_mut(self.current_file_index)
    }

    /// Record a transmitted chunk for the current file and refresh the
    /// update timestamp.
    pub fn mark_chunk_sent(&mut self, chunk_index: u32) {
        if let Some(file) = self.files.get_mut(self.current_file_index) {
            file.mark_chunk_sent(chunk_index);
        }
        self.touch();
    }

    /// Complete the current file and advance `current_file_index` to the
    /// first remaining incomplete file (or past-the-end).
    pub fn complete_current_file(&mut self) {
        if let Some(file) = self.files.get_mut(self.current_file_index) {
            file.is_completed = true;
            file.is_paused = false;
        }
        self.current_file_index = self
            .files
            .iter()
            .position(|f| !f.is_completed && !f.failed)
            .unwrap_or(self.files.len());
        if self.files.iter().all(|f| f.is_completed) {
            self.is_completed = true;
        }
        self.touch();
    }

    /// Mark the current file (and thereby the session) failed.
    pub fn fail_current_file(&mut self) {
        if let Some(file) = self.files.get_mut(self.current_file_index) {
            file.failed = true;
        }
        self.touch();
    }

    /// Toggle the session-level pause flag.
    pub fn set_paused(&mut self, paused: bool) {
        self.is_paused = paused;
        if let Some(file) = self.files.get_mut(self.current_file_index) {
            if !file.is_completed && !file.failed {
                file.is_paused = paused;
            }
        }
        self.touch();
    }

    /// Total plaintext bytes across the manifest.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.file_size).sum()
    }

    /// Overall transferred bytes: full sizes of completed files plus the
    /// sent share of the current file. Monotonically non-decreasing for the
    /// duration of a session.
    pub fn transferred_bytes(&self) -> u64 {
        let completed: u64 = self
            .files
            .iter()
            .filter(|f| f.is_completed)
            .map(|f| f.file_size)
            .sum();
        let current = self
            .current_file()
            .filter(|f| !f.is_completed)
            .map(|f| {
                let sent = u64::from(f.completed_chunks) * CHUNK_SIZE as u64;
                sent.min(f.file_size)
            })
            .unwrap_or(0);
        completed + current
    }

    fn touch(&mut self) {
        self.last_update_time = Utc::now();
    }
}
