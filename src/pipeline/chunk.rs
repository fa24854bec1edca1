//! Chunking of the encrypted byte stream and per-chunk completion tracking.
//!
//! The sender encrypts a whole file as one AEAD operation and splits the
//! combined `[nonce ‖ ciphertext]` buffer into bounded-size units here. Each
//! unit becomes one binary channel message. `ChunkRecord`s track which units
//! have actually been transmitted, which is what makes a paused or restarted
//! transfer resumable without retransmission.

use serde::{Deserialize, Serialize};

/// Number of chunks a buffer of `len` bytes splits into: `ceil(len / size)`.
/// Zero-length input yields zero chunks.
pub fn chunk_count(len: usize, chunk_size: usize) -> u32 {
    debug_assert!(chunk_size > 0);
    len.div_ceil(chunk_size) as u32
}

/// Deterministic, lazy sequence of chunk slices over `buffer`.
///
/// The last slice may be shorter than `chunk_size`. Concatenating the
/// produced slices in order reconstructs `buffer` exactly.
pub fn chunks(buffer: &[u8], chunk_size: usize) -> impl Iterator<Item = &[u8]> {
    debug_assert!(chunk_size > 0);
    buffer.chunks(chunk_size)
}

/// Transmission state of one chunk within a file's encrypted stream.
///
/// `chunk_index` is dense, zero-based, and contiguous per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub chunk_index: u32,
    pub sent: bool,
}

impl ChunkRecord {
    /// Build the dense record sequence for a file with `total` chunks.
    pub fn sequence(total: u32) -> Vec<Self> {
        (0..total)
            .map(|chunk_index| Self {
                chunk_index,
                sent: false,
            })
            .collect()
    }

    /// Index of the first unsent record, or `None` when all are sent.
    /// Resume continues from here; already-sent chunks are never resent.
    pub fn first_unsent(records: &[Self]) -> Option<u32> {
        records.iter().find(|r| !r.sent).map(|r| r.chunk_index)
    }

    /// Count of records marked sent.
    pub fn sent_count(records: &[Self]) -> u32 {
        records.iter().filter(|r| r.sent).count() as u32
    }
}
