//! # Exponential Backoff
//!
//! Per-key retry delays for failed reconciliation passes.
//!
//! Each failure doubles the delay, starting at `start_secs` and capped at
//! `max_secs`. A successful pass resets the sequence.
//!
//! ## Usage
//!
//! ```rust
//! use aqua_operator::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(1, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 1);
//! assert_eq!(backoff.next_backoff_seconds(), 2);
//! assert_eq!(backoff.next_backoff_seconds(), 4);
//! ```

use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay after a reset
    start_secs: u64,
    /// Delay returned by the next call
    current_secs: u64,
    /// Upper bound for any delay
    max_secs: u64,
    /// Consecutive failures since the last reset
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `start_secs` and capped at `max_secs`
    ///
    /// A zero start is treated as one second so the sequence still grows.
    #[must_use]
    pub fn new(start_secs: u64, max_secs: u64) -> Self {
        let start_secs = start_secs.max(1);
        Self {
            start_secs,
            current_secs: start_secs.min(max_secs.max(1)),
            max_secs: max_secs.max(1),
            attempts: 0,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        self.current_secs = self.current_secs.saturating_mul(2).min(self.max_secs);
        self.attempts = self.attempts.saturating_add(1);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Number of failures recorded since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current_secs = self.start_secs.min(self.max_secs);
        self.attempts = 0;
    }
}
