//! Reconnect backoff for the live replication session.
//!
//! The live session never gives up: transport failures are logged and the
//! session reconnects with capped exponential backoff. Transport-level
//! timeouts and per-request retry stay out of this layer.

use std::time::Duration;

/// Configuration for reconnect backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,

    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g. 2.0 = double the delay each failure).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast-fail backoff for tests.
    pub fn testing() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Calculate the delay after `consecutive_failures` failures (1-indexed).
    ///
    /// ```text
    /// Failures  Delay (defaults)
    /// --------  ----------------
    /// 1         1s
    /// 2         2s
    /// 3         4s
    /// ...
    /// 9+        300s (cap)
    /// ```
    pub fn delay_for_attempt(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures <= 1 {
            return self.initial_delay;
        }
        let multiplier = self.backoff_factor.powi(consecutive_failures as i32 - 1);
        let delay = Duration::from_secs_f64(self.initial_delay.as_secs_f64() * multiplier);
        std::cmp::min(delay, self.max_delay)
    }
}
