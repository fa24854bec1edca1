//! Dropline — serverless peer-to-peer encrypted file transfer engine.
//!
//! Two peers exchange a small signaling payload once (out of band) and then
//! talk directly over an ordered, reliable, message-oriented duplex channel.
//! This crate is the transfer engine built on top of such a channel:
//!
//! - whole-file AES-256-GCM encryption, `[nonce ‖ ciphertext]` on the wire
//! - 16 KiB chunking and arrival-order reassembly
//! - pause/resume from either peer, surviving process restarts via a
//!   persisted per-session chunk-completion record
//! - advisory speed/ETA metrics derived from progress samples
//!
//! The transport itself (NAT traversal, signaling, connection state) is an
//! external collaborator behind the narrow [`channel::Channel`] trait.

pub mod channel;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod store;

pub use channel::{Channel, MemoryChannel};
pub use crypto::EncryptionKey;
pub use engine::{ReceivedFile, Receiver, Sender, TransferEvent};
pub use error::TransferError;
pub use session::{FileManifestEntry, SessionState};
pub use store::{HistoryStore, SessionStore};
