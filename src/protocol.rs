//! Wire messages exchanged over the duplex channel.
//!
//! One logical stream, two message kinds:
//!
//! - **Control** — JSON-encoded structured messages carrying the per-file
//!   metadata announcement, the authoritative end-of-file signal, and
//!   pause/resume notifications.
//! - **Data** — raw binary messages, each one chunk of the combined
//!   `[nonce ‖ ciphertext]` buffer, at most [`CHUNK_SIZE`] bytes.
//!
//! [`CHUNK_SIZE`]: crate::config::CHUNK_SIZE

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Control messages, JSON-serialized as `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// File metadata sent before chunks. Transitions the file to `Announced`
    /// on both sides. Immutable once announced.
    Metadata {
        name: String,
        size: u64,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Authoritative per-file completion signal. The receiver must not
    /// consider a file complete until this arrives, even when the byte
    /// count matches — the declared size is peer-supplied metadata, not a
    /// completion oracle.
    End,
    /// The remote peer paused its send loop.
    Pause,
    /// The remote peer resumed its send loop.
    Resume,
}

impl ControlMessage {
    /// Encode to the JSON text form sent on the wire.
    pub fn encode(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from wire text.
    pub fn decode(text: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One message on the duplex channel.
#[derive(Debug, Clone)]
pub enum WireMessage {
    /// A text-encoded [`ControlMessage`].
    Control(String),
    /// One chunk of the encrypted byte stream.
    Data(Bytes),
}

impl WireMessage {
    /// Wrap and encode a control message.
    pub fn control(msg: &ControlMessage) -> Result<Self, TransferError> {
        Ok(Self::Control(msg.encode()?))
    }
}
