//! Exponential backoff policy
//!
//! Both delivery paths wait `base * 2^(attempt-1)` between attempts, capped
//! at `max_delay`. No jitter: the schedule is deterministic so operators can
//! reason about worst-case delivery latency from configuration alone.

use std::time::Duration;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (e.g., 1s)
    pub base_delay: Duration,
    /// Maximum delay between retries (e.g., 30s)
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the default 30s cap
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Override the cap
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed)
    ///
    /// Attempt 0 returns zero. Overflowing intermediate values saturate to
    /// the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}
