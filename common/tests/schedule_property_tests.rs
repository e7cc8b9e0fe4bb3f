// Property-based tests for cron next-execution-time calculation.

use chrono::{TimeZone, Utc};
use common::schedule::calculate_cron_next_execution;
use proptest::prelude::*;

/// For any valid hour/minute, the computed next execution in UTC is always strictly
/// after the reference instant the schedule was evaluated from.
#[test]
fn next_execution_is_always_strictly_after_reference() {
    proptest!(|(hour in 0u32..24, minute in 0u32..60, day_offset in 0i64..28)| {
        let reference = Utc.with_ymd_and_hms(2026, 1, 1 + day_offset as u32, 12, 0, 0).unwrap();
        let expression = format!("0 {minute} {hour} * * *");

        let next = calculate_cron_next_execution(&expression, "UTC", reference).unwrap();
        prop_assert!(next > reference);
    });
}

/// Re-evaluating the same cron expression from its own previous result always moves
/// strictly forward again, so repeated scheduling can never stall or loop.
#[test]
fn repeated_evaluation_keeps_advancing() {
    proptest!(|(hour in 0u32..24, minute in 0u32..60)| {
        let reference = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let expression = format!("0 {minute} {hour} * * *");

        let first = calculate_cron_next_execution(&expression, "UTC", reference).unwrap();
        let second = calculate_cron_next_execution(&expression, "UTC", first).unwrap();
        prop_assert!(second > first);
    });
}
