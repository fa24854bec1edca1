//! Arrival-order reassembly of received chunks.
//!
//! The transport guarantees ordered, reliable delivery, so the reassembler
//! does no reordering and no deduplication — it appends each binary message
//! to a single buffer and finalizes on the end-of-file signal. A finished
//! buffer shorter than the nonce cannot possibly be a valid transfer and is
//! rejected as truncated.

use crate::config::NONCE_LEN;
use crate::error::TransferError;

/// Accumulates received chunk payloads for one file.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    /// Fresh, empty reassembler. Created anew for every announced file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the buffer from the declared file size. The declared size is
    /// peer-supplied, so the capacity hint is clamped rather than trusted.
    pub fn with_declared_size(declared: u64) -> Self {
        // 64 MiB cap keeps a hostile Metadata frame from forcing a huge
        // upfront allocation; the buffer still grows as real data arrives.
        const CAP_HINT_MAX: usize = 64 * 1024 * 1024;
        Self {
            buffer: Vec::with_capacity((declared as usize).min(CAP_HINT_MAX)),
        }
    }

    /// Append one received chunk, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Finalize on the end-of-file signal, yielding the accumulated
    /// `[nonce ‖ ciphertext]` buffer.
    ///
    /// # Errors
    ///
    /// `TruncatedTransfer` when fewer than [`NONCE_LEN`] bytes arrived —
    /// even an empty plaintext carries a nonce and tag.
    pub fn finish(self) -> Result<Vec<u8>, TransferError> {
        if self.buffer.len() < NONCE_LEN {
            return Err(TransferError::TruncatedTransfer {
                got: self.buffer.len(),
                min: NONCE_LEN,
            });
        }
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHUNK_SIZE;
    use crate::pipeline::chunks;

    #[test]
    fn reassembles_in_arrival_order() {
        let original: Vec<u8> = (0..CHUNK_SIZE * 2 + 500).map(|i| (i % 256) as u8).collect();
        let mut reassembler = Reassembler::new();
        for piece in chunks(&original, CHUNK_SIZE) {
            reassembler.push(piece);
        }
        assert_eq!(reassembler.finish().unwrap(), original);
    }

    #[test]
    fn finish_rejects_short_accumulation() {
        let mut reassembler = Reassembler::new();
        reassembler.push(&[1, 2, 3]);
        assert!(matches!(
            reassembler.finish(),
            Err(TransferError::TruncatedTransfer { got: 3, min: 12 })
        ));
    }

    #[test]
    fn empty_stream_is_truncated() {
        assert!(matches!(
            Reassembler::new().finish(),
            Err(TransferError::TruncatedTransfer { got: 0, .. })
        ));
    }

    #[test]
    fn nonce_only_buffer_passes_length_check() {
        let mut reassembler = Reassembler::new();
        reassembler.push(&[0u8; NONCE_LEN]);
        assert_eq!(reassembler.finish().unwrap().len(), NONCE_LEN);
    }
}
