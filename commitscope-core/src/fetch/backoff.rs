//! Exponential backoff policy for transient source failures
//!
//! Kept separate from any network code so retry behavior can be tested
//! with nothing but attempt numbers.

use crate::config::FetchConfig;
use std::time::Duration;

/// Retry policy: bounded attempts with exponentially growing delays.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
    /// Apply +/-10% random jitter to each delay
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// A policy that retries immediately, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// Doubles per attempt from `base_delay`, capped at `max_delay`,
    /// with optional +/-10% jitter so concurrent retries spread out.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let raw = self
            .base_delay
            .saturating_mul(factor.min(u32::MAX as u64) as u32);
        let mut delay = raw.min(self.max_delay);

        if self.jitter && delay > Duration::ZERO {
            let jitter_range = delay.as_millis() as f64 * 0.1;
            let jitter_offset = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            let jittered = (delay.as_millis() as f64 + jitter_offset).max(0.0);
            delay = Duration::from_millis(jittered as u64);
        }

        delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}
