// Property-based tests for the worker's exponential backoff retry strategy.

use common::retry::{ExponentialBackoff, RetryStrategy, DEFAULT_MAX_RETRIES};
use proptest::prelude::*;

/// For any attempt count, `next_delay` is `Some` strictly below `max_retries` and
/// `None` from `max_retries` onward, and `should_retry` agrees with that boundary.
#[test]
fn retry_limit_enforcement_holds_for_any_max_retries() {
    proptest!(|(attempt in 0u32..50u32, max_retries in 1u32..20u32)| {
        let strategy = ExponentialBackoff::with_config(5, 3, 1800, 0.1, max_retries);

        if attempt < max_retries {
            prop_assert!(strategy.should_retry(attempt));
            prop_assert!(strategy.next_delay(attempt).is_some());
        } else {
            prop_assert!(!strategy.should_retry(attempt));
            prop_assert!(strategy.next_delay(attempt).is_none());
        }
    });
}

/// Backoff delay grows monotonically with the attempt number and never exceeds
/// `max_delay_secs`, regardless of the configured base and factor.
#[test]
fn backoff_delay_is_monotonic_and_capped() {
    proptest!(|(
        base_delay in 1u64..60u64,
        factor in 1u64..5u64,
        max_delay in 60u64..7200u64,
        attempt in 0u32..10u32,
    )| {
        let strategy = ExponentialBackoff::with_config(base_delay, factor, max_delay, 0.0, DEFAULT_MAX_RETRIES);
        let this = strategy.next_delay(attempt).unwrap().as_secs();
        let next = strategy.next_delay(attempt + 1).unwrap().as_secs();

        prop_assert!(this <= max_delay);
        prop_assert!(next <= max_delay);
        prop_assert!(next >= this);
    });
}

/// Jitter only ever adds delay on top of the base, never subtracts from it, and
/// never pushes the result past `max_delay_secs + jitter_factor * max_delay_secs`.
#[test]
fn jitter_never_reduces_below_base_delay() {
    proptest!(|(
        base_delay in 1u64..120u64,
        jitter_factor in 0.0f64..1.0f64,
        attempt in 0u32..5u32,
    )| {
        let strategy = ExponentialBackoff::with_config(base_delay, 1, base_delay, jitter_factor, DEFAULT_MAX_RETRIES);
        let delay_ms = strategy.next_delay(attempt).unwrap().as_millis();
        let base_ms = (base_delay * 1000) as u128;
        let max_jitter_ms = (base_ms as f64 * jitter_factor) as u128;

        prop_assert!(delay_ms >= base_ms);
        prop_assert!(delay_ms <= base_ms + max_jitter_ms);
    });
}
