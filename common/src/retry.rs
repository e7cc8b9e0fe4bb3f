// Exponential backoff retry strategy for worker job processing.

use crate::config::WorkerConfig;
use rand::Rng;
use std::time::Duration;

/// Fallback retry cap when a caller builds a strategy without a worker config.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

pub trait RetryStrategy: Send + Sync {
    /// Calculate the delay before the next retry attempt. `None` once retries are exhausted.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries()
    }

    fn max_retries(&self) -> u32;
}

/// Exponential backoff with jitter: `base * factor^attempt`, capped at `max_delay_secs`.
/// Base, factor, and retry cap are all configurable so deployments can tune retry
/// pressure per worker pool instead of inheriting one hardcoded curve.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_secs: u64,
    factor: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
    max_retries: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            factor: 3,
            max_delay_secs: 1800,
            jitter_factor: 0.1,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_worker_config(config: &WorkerConfig) -> Self {
        Self {
            base_delay_secs: config.retry_base_delay_seconds,
            factor: config.retry_backoff_factor,
            max_retries: config.max_retries,
            ..Self::default()
        }
    }

    pub fn with_config(
        base_delay_secs: u64,
        factor: u64,
        max_delay_secs: u64,
        jitter_factor: f64,
        max_retries: u32,
    ) -> Self {
        Self {
            base_delay_secs,
            factor: factor.max(1),
            max_delay_secs,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_retries,
        }
    }

    fn calculate_base_delay(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_secs.saturating_mul(self.factor.saturating_pow(attempt));
        delay.min(self.max_delay_secs)
    }

    /// Returns delay in milliseconds, with uniform random jitter added on top.
    fn add_jitter_ms(&self, base_delay_secs: u64) -> u64 {
        if self.jitter_factor == 0.0 {
            return base_delay_secs * 1000;
        }

        let mut rng = rand::thread_rng();
        let base_delay_ms = base_delay_secs * 1000;
        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;

        let jitter_ms = if jitter_range_ms > 0 { rng.gen_range(0..=jitter_range_ms) } else { 0 };

        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }

        let base_delay_secs = self.calculate_base_delay(attempt);
        let delay_with_jitter_ms = self.add_jitter_ms(base_delay_secs);

        Some(Duration::from_millis(delay_with_jitter_ms))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Fixed delay retry strategy, used in tests that need deterministic timing.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_retries: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay, max_retries: DEFAULT_MAX_RETRIES }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        Some(self.delay)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_sequence_matches_base_and_factor() {
        let strategy = ExponentialBackoff::with_config(5, 3, 1800, 0.0, DEFAULT_MAX_RETRIES);

        assert_eq!(strategy.calculate_base_delay(0), 5);
        assert_eq!(strategy.calculate_base_delay(1), 15);
        assert_eq!(strategy.calculate_base_delay(2), 45);
        assert_eq!(strategy.calculate_base_delay(3), 135);
        assert_eq!(strategy.calculate_base_delay(6), 1800); // capped
    }

    #[test]
    fn different_factor_changes_growth_rate() {
        let strategy = ExponentialBackoff::with_config(10, 2, 3600, 0.0, DEFAULT_MAX_RETRIES);
        assert_eq!(strategy.calculate_base_delay(0), 10);
        assert_eq!(strategy.calculate_base_delay(1), 20);
        assert_eq!(strategy.calculate_base_delay(2), 40);
    }

    #[test]
    fn from_worker_config_uses_configured_values() {
        let mut config = WorkerConfig::default();
        config.retry_base_delay_seconds = 10;
        config.retry_backoff_factor = 2;
        config.max_retries = 4;

        let strategy = ExponentialBackoff::from_worker_config(&config);
        assert_eq!(strategy.max_retries(), 4);
        assert_eq!(strategy.calculate_base_delay(1), 20);
    }

    #[test]
    fn retry_limit_enforcement() {
        let strategy = ExponentialBackoff::with_config(5, 3, 1800, 0.1, 3);
        for attempt in 0..3 {
            assert!(strategy.next_delay(attempt).is_some());
        }
        assert!(strategy.next_delay(3).is_none());
    }

    #[test]
    fn jitter_adds_randomness() {
        let strategy = ExponentialBackoff::default();

        let mut delays = Vec::new();
        for _ in 0..20 {
            if let Some(delay) = strategy.next_delay(0) {
                delays.push(delay.as_millis());
            }
        }

        let first_delay = delays[0];
        assert!(delays.iter().any(|&d| d != first_delay));

        let base_delay_ms = 5000u128;
        let max_jitter_ms = (base_delay_ms as f64 * 0.1) as u128;
        for delay in delays {
            assert!(delay >= base_delay_ms && delay <= base_delay_ms + max_jitter_ms);
        }
    }

    #[test]
    fn jitter_factor_clamping() {
        let strategy1 = ExponentialBackoff::with_config(5, 3, 1800, -0.5, DEFAULT_MAX_RETRIES);
        assert_eq!(strategy1.jitter_factor, 0.0);

        let strategy2 = ExponentialBackoff::with_config(5, 3, 1800, 1.5, DEFAULT_MAX_RETRIES);
        assert_eq!(strategy2.jitter_factor, 1.0);
    }

    #[test]
    fn fixed_delay_strategy_returns_constant_delay() {
        let delay = Duration::from_secs(10);
        let strategy = FixedDelay::new(delay);

        for attempt in 0..DEFAULT_MAX_RETRIES {
            assert_eq!(strategy.next_delay(attempt), Some(delay));
        }
        assert_eq!(strategy.next_delay(DEFAULT_MAX_RETRIES), None);
    }
}
