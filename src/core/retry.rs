//! Retry backoff for failed tasks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff: `base * multiplier^attempt`, capped at `max_delay_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_base_delay() -> u64 {
    30_000
}
fn default_max_delay() -> u64 {
    3_600_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next run, given the attempt count after the failure
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);

        let capped = if delay.is_finite() {
            delay.min(self.max_delay_ms as f64) as u64
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }
}
