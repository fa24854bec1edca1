//! Speed and ETA estimation from progress samples.
//!
//! Advisory display data only — nothing here ever gates protocol behavior.
//! Chunk events arrive in bursts (the channel drains its buffer unevenly),
//! so instantaneous speed is only recomputed when at least 100 ms separate
//! two samples; anything faster reuses the cumulative average to keep the
//! displayed number from jittering.

use std::time::{Duration, Instant};

use crate::config::SPEED_SAMPLE_INTERVAL;

/// One progress observation. Ephemeral — produced on every chunk event and
/// consumed immediately by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    /// Bytes transferred so far for the current file.
    pub bytes_transferred: u64,
    /// Declared total bytes for the current file.
    pub total_bytes: u64,
}

/// Estimated time to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Remaining time at the current speed.
    Duration(Duration),
    /// Speed is zero (or no samples yet) — no meaningful estimate.
    Indeterminate,
}

/// Converts a stream of (bytes, timestamp) samples into instantaneous speed
/// and ETA.
#[derive(Debug)]
pub struct SpeedEstimator {
    started: Instant,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    /// Bytes per second from the most recent wide-enough sample window.
    speed: f64,
}

impl SpeedEstimator {
    /// Start estimating; `now` becomes both the session start and the first
    /// sample timestamp.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_sample_at: now,
            last_sample_bytes: 0,
            speed: 0.0,
        }
    }

    /// Feed one sample; returns the current speed in bytes/second.
    pub fn record(&mut self, bytes_transferred: u64) -> f64 {
        self.record_at(bytes_transferred, Instant::now())
    }

    fn record_at(&mut self, bytes_transferred: u64, now: Instant) -> f64 {
        let since_last = now.duration_since(self.last_sample_at);
        if since_last >= SPEED_SAMPLE_INTERVAL {
            let delta = bytes_transferred.saturating_sub(self.last_sample_bytes);
            self.speed = delta as f64 / since_last.as_secs_f64();
            self.last_sample_at = now;
            self.last_sample_bytes = bytes_transferred;
        } else {
            // Burst window: fall back to the cumulative average.
            let since_start = now.duration_since(self.started);
            if since_start > Duration::ZERO {
                self.speed = bytes_transferred as f64 / since_start.as_secs_f64();
            }
        }
        self.speed
    }

    /// Current speed in bytes/second (0.0 before any wide-enough sample).
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// ETA for `remaining` bytes at the current speed. Never negative;
    /// indeterminate when speed is zero.
    pub fn eta(&self, transferred: u64, total: u64) -> Eta {
        if self.speed <= 0.0 {
            return Eta::Indeterminate;
        }
        let remaining = total.saturating_sub(transferred);
        Eta::Duration(Duration::from_secs_f64(remaining as f64 / self.speed))
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}
