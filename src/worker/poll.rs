//! Status poll schedule with exponential backoff
//!
//! Delays between status polls grow exponentially and are capped:
//! - Poll 1: `interval_ms`
//! - Poll 2: `2 * interval_ms`
//! - Poll 3: `4 * interval_ms`
//! - Capped at `max_interval_ms`
//!
//! After `max_attempts` polls without a settled remote status the
//! continuation gives up and the task fails as timed out.
//!
//! ## Configuration Example
//!
//! ```yaml
//! worker:
//!   poll_interval_ms: 2000
//!   max_poll_interval_ms: 30000
//!   max_poll_attempts: 120
//! ```

use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_MAX_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    /// Delay before the first poll in milliseconds
    pub interval_ms: u64,
    /// Maximum delay between polls in milliseconds (cap for exponential growth)
    pub max_interval_ms: u64,
    /// Maximum number of polls
    pub max_attempts: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl PollSchedule {
    pub fn new(interval_ms: u64, max_interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_interval_ms,
            max_attempts,
        }
    }

    /// Delay to wait before poll number `attempt` (0-indexed)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        // interval * 2^attempt, saturating
        let delay_ms = self
            .interval_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_interval_ms.max(self.interval_ms));

        Duration::from_millis(delay_ms)
    }

    /// Whether poll number `attempt` (0-indexed) may still be issued
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Upper bound on the time spent waiting across all polls
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts)
            .map(|attempt| self.delay_before(attempt))
            .sum()
    }
}
