//! Linear-backoff retry policy for generation calls.
//!
//! After failed attempt `n` the client waits `n * base_delay` before
//! trying again, up to `max_attempts` attempts in total.

use std::time::Duration;

/// Tunable retry parameters.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay unit; the wait after attempt `n` is `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Delay before the attempt that follows failed attempt `attempt` (1-based).
pub fn delay_for_attempt(attempt: u32, config: &RetryConfig) -> Duration {
    config.base_delay.saturating_mul(attempt)
}
