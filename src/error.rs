//! Error taxonomy for the transfer engine.
//!
//! Protocol-level failures (authentication, truncation) are terminal for the
//! affected file and are never retried automatically — the expectation is a
//! new session with a fresh key exchange. Storage failures are surfaced but
//! never corrupt in-memory session state.

use thiserror::Error;

/// Errors produced by the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The entropy source failed during key generation. Fatal, non-retryable.
    #[error("key generation failed: entropy source unavailable")]
    KeyGenerationFailed,

    /// An imported key string was malformed. The session setup is rejected.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The AEAD integrity tag did not verify — tampering or corruption.
    /// Terminal for the current file; no partial output is surfaced.
    #[error("authentication failed: integrity tag mismatch")]
    AuthenticationFailed,

    /// Any cipher failure other than tag verification.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The accumulated stream was shorter than the minimum viable size when
    /// the end-of-file signal arrived. Treated as a corrupted file.
    #[error("truncated transfer: {got} bytes accumulated, need at least {min}")]
    TruncatedTransfer { got: usize, min: usize },

    /// A send was attempted before the channel was open.
    #[error("channel not ready")]
    ChannelNotReady,

    /// The channel closed mid-transfer. The session is marked failed.
    #[error("channel closed during transfer")]
    ChannelClosed,

    /// A persisted session record could not be read, written, or deleted.
    /// The engine keeps operating without persistence when this happens
    /// during a transfer; it is only fatal for explicit load/sweep calls.
    #[error("session storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A persisted record or control message failed to (de)serialize.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
