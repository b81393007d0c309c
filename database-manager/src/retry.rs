// Retry strategy with exponential backoff and jitter
// Used when a pool has to open a new connection at runtime and the network blips

use rand::Rng;
use std::time::Duration;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Calculate the delay before retry number `attempt` (0-based).
    /// Returns None once retries are exhausted.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Check if more retries are allowed
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries()
    }

    /// Get the maximum number of retries
    fn max_retries(&self) -> u32;
}

/// Exponential backoff: base, 2×base, 4×base, ... capped at `max_delay`,
/// plus up to `jitter_factor` of random extra delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    max_retries: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.1,
            max_retries: 2,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_retries,
        }
    }

    /// Backoff for connection retries: base delay from settings, capped at 5s, 10% jitter
    pub fn for_connections(base_delay: Duration, max_retries: u32) -> Self {
        Self::new(base_delay, Duration::from_secs(5), 0.1, max_retries)
    }

    /// Delay for `attempt` before jitter
    fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 {
            return delay;
        }

        let jitter_range_ms = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        if jitter_range_ms == 0 {
            return delay;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_range_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        Some(self.add_jitter(self.base_delay_for(attempt)))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
