//! Cron expression evaluation for recurring jobs.
//!
//! Uses the 6-field dialect (seconds, minutes, hours, day-of-month, month,
//! day-of-week) from the `cron` crate. Schedules are evaluated in UTC only;
//! there is no per-job timezone.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::SchedulerError;

/// Parses `expr` and returns the next fire time strictly after `after`.
pub fn next_fire_time(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, SchedulerError> {
    let schedule = Schedule::from_str(expr)
        .map_err(|e| SchedulerError::InvalidCron(expr.to_string(), e.to_string()))?;
    Ok(schedule.after(&after).next())
}

/// Validates `expr` without computing a fire time.
pub fn validate(expr: &str) -> Result<(), SchedulerError> {
    Schedule::from_str(expr)
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(expr.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_minute_fires_on_the_minute() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 15).unwrap();
        let next = next_fire_time("0 * * * * *", anchor).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 31, 0).unwrap());
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(validate("not a cron expr").is_err());
    }

    #[test]
    fn five_field_expression_is_rejected() {
        // the five-field (no-seconds) dialect is not accepted
        assert!(validate("* * * * *").is_err());
    }
}
