//! Back-off between attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Linear back-off with a ceiling.
///
/// After attempt `n` fails the engine waits `min(cap, n * step)` before
/// attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub step: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(5),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(step: Duration, cap: Duration) -> Self {
        Self { step, cap }
    }

    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay to apply after `failed_attempt` (1-based) has failed.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        self.step
            .checked_mul(failed_attempt)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}
