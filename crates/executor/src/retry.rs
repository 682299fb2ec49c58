//! Race-retry policy
//!
//! Commit races are retried with exponential backoff and uniform jitter
//! until a wall-clock budget runs out. The jitter spreads rescheduled
//! commits of colliding Sessions apart; without it two racing workers tend
//! to collide again on the next attempt.

use rand::Rng;
use std::time::Duration;
use tessera_core::limits::{DEFAULT_RETRY_BUDGET_MS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS};

/// Backoff parameters for commit-race retries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total wall-clock budget across all attempts
    pub budget: Duration,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on any single delay (before jitter)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            budget: Duration::from_millis(DEFAULT_RETRY_BUDGET_MS),
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom wall-clock budget
    pub fn with_budget(budget: Duration) -> Self {
        RetryPolicy {
            budget,
            ..Default::default()
        }
    }

    /// Jittered delay before retry number `attempt` (first retry is 1)
    ///
    /// Doubles per attempt, capped at `max_delay`, then scaled by a uniform
    /// factor in `[0.5, 1.5)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        capped.mul_f64(jitter)
    }
}
