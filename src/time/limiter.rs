//! Spacing between external time fetches
//!
//! The minimum gap between attempts grows exponentially with consecutive
//! failures and carries a random jitter so that sibling contexts recovering
//! from the same outage do not hit the time server in lockstep. All
//! measurements use the monotonic clock.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::TimeConfig;

/// Exponential backoff gate for time fetches
#[derive(Debug, Clone)]
pub struct BackoffLimiter {
    base_interval_ms: u64,
    backoff_multiplier: f64,
    max_interval_ms: u64,
    max_failures: u32,
    jitter_ratio: f64,

    consecutive_failures: u32,
    last_attempt_ms: Option<i64>,
    /// Jitter drawn when the last attempt was recorded
    jitter_ms: u64,
}

impl BackoffLimiter {
    /// Create a limiter from the time configuration
    pub fn new(config: &TimeConfig) -> Self {
        Self {
            base_interval_ms: config.base_interval_ms,
            backoff_multiplier: config.backoff_multiplier,
            max_interval_ms: config.max_interval_ms,
            max_failures: config.max_failures,
            jitter_ratio: config.jitter_ratio,
            consecutive_failures: 0,
            last_attempt_ms: None,
            jitter_ms: 0,
        }
    }

    /// Backoff interval for the current failure count, before jitter
    pub fn interval_ms(&self) -> u64 {
        let exponential =
            self.base_interval_ms as f64 * self.backoff_multiplier.powi(self.consecutive_failures as i32);
        (exponential as u64).min(self.max_interval_ms)
    }

    /// Full spacing required after the last attempt
    pub fn required_spacing_ms(&self) -> u64 {
        self.interval_ms() + self.jitter_ms
    }

    /// Whether a fetch may be attempted at monotonic instant `now_ms`
    pub fn ready(&self, now_ms: i64) -> bool {
        match self.last_attempt_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.required_spacing_ms() as i64,
        }
    }

    /// Record that a fetch is starting and draw the jitter for the next gap
    pub fn record_attempt(&mut self, now_ms: i64, rng: &mut ChaCha8Rng) {
        self.last_attempt_ms = Some(now_ms);
        self.jitter_ms = self.draw_jitter(rng);
    }

    /// Reset the failure streak
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Extend the failure streak, up to the configured cap
    pub fn record_failure(&mut self, rng: &mut ChaCha8Rng) {
        self.consecutive_failures = (self.consecutive_failures + 1).min(self.max_failures);
        self.jitter_ms = self.draw_jitter(rng);
    }

    /// Current failure streak
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn draw_jitter(&self, rng: &mut ChaCha8Rng) -> u64 {
        let ceiling = (self.interval_ms() as f64 * self.jitter_ratio) as u64;
        if ceiling == 0 {
            0
        } else {
            rng.gen_range(0..=ceiling)
        }
    }
}
