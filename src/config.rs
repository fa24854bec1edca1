//! Centralized protocol constants.
//!
//! All tunable parameters live here so they can be reviewed and adjusted in
//! a single place. Both peers must agree on the wire-level values
//! (`CHUNK_SIZE`, `NONCE_LEN`); the rest are local behavior knobs.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Protocol chunk size in bytes (16 KiB).
///
/// Shared by both peers. Sized to stay below typical data-channel message
/// limits while keeping per-chunk overhead low relative to buffering cost.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// AES-GCM nonce length. The nonce is always prepended to the ciphertext,
/// never sent separately, so a finished transfer can never be shorter than
/// this many bytes.
pub const NONCE_LEN: usize = 12;

// ── Flow control ─────────────────────────────────────────────────────────────

/// High water mark for the channel's outstanding buffered bytes.
///
/// When `buffered_amount` exceeds this value, the sender pauses chunk
/// transmission and polls until the buffer drains.
pub const BACKPRESSURE_HIGH: usize = 4 * CHUNK_SIZE;

/// Poll interval while waiting for the channel buffer to drain.
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Poll interval while the send loop is paused.
///
/// A paused session is expected to resume within the retention window, not
/// immediately, so the check interval favors low idle cost over latency.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Metrics ──────────────────────────────────────────────────────────────────

/// Minimum elapsed time between progress samples before a new instantaneous
/// speed is computed. Samples arriving faster than this reuse the cumulative
/// average to avoid update noise from bursts.
pub const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

// ── Persistence ──────────────────────────────────────────────────────────────

/// Retention age for abandoned session records. `SessionStore::sweep_expired`
/// deletes anything not updated within this window; intended to run once per
/// process start.
pub const SESSION_RETENTION: Duration = Duration::from_secs(24 * 3600);
