// Cron scheduling: next-execution-time calculation for scheduled tasks.

use crate::errors::ScheduleError;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Parse and validate a task's cron expression up front, so invalid expressions are
/// rejected at create-time rather than discovered the first time the task fires.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Compute the next execution time for a cron expression, evaluated in the task's own
/// IANA timezone and converted back to UTC. Always computed from the current wall
/// clock — pausing and resuming a task resumes from whenever it's resumed, not from
/// where it left off.
pub fn calculate_cron_next_execution(
    expression: &str,
    timezone: &str,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;

    let tz: Tz = timezone
        .parse()
        .map_err(|_| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: format!("unknown timezone '{timezone}'"),
        })?;

    let reference_in_tz = reference.with_timezone(&tz);

    let next = schedule
        .after(&reference_in_tz)
        .next()
        .ok_or_else(|| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: "no future execution time could be computed".to_string(),
        })?;

    Ok(next.with_timezone(&Utc))
}

pub fn default_timezone() -> String {
    "UTC".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn parses_valid_five_field_cron_expression() {
        assert!(parse_cron_expression("0 0 * * * *").is_ok());
    }

    #[test]
    fn rejects_malformed_cron_expression() {
        assert!(parse_cron_expression("not a cron").is_err());
    }

    #[test]
    fn next_execution_is_strictly_after_reference() {
        let reference = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = calculate_cron_next_execution("0 * * * * *", "UTC", reference).unwrap();
        assert!(next > reference);
    }

    #[test]
    fn next_execution_respects_timezone_offset() {
        let reference = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // Fires at 09:00 local time; in Asia/Ho_Chi_Minh (UTC+7) that's 02:00 UTC.
        let next =
            calculate_cron_next_execution("0 0 9 * * *", "Asia/Ho_Chi_Minh", reference).unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "02:00");
    }

    #[test]
    fn rejects_unknown_timezone() {
        let reference = Utc::now();
        assert!(calculate_cron_next_execution("0 * * * * *", "Not/AZone", reference).is_err());
    }
}
