//! Computes the next `next_run` instant for a finished task (spec.md §4.6):
//! cron via a cron-expression parser in the configured timezone, interval via
//! `now + ms`, and `once` tasks always advance to `None` (completed).

use std::str::FromStr;

use agentflow_protocol::ScheduleType;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

#[derive(Debug, thiserror::Error)]
pub enum NextRunError {
    #[error("invalid cron expression {0:?}: {1}")]
    InvalidCron(String, String),
    #[error("invalid interval value {0:?}")]
    InvalidInterval(String),
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error("cron schedule {0:?} has no upcoming occurrence")]
    NoUpcomingOccurrence(String),
}

/// `schedule_value` is a cron expression for [`ScheduleType::Cron`], a
/// millisecond interval (as a string) for [`ScheduleType::Interval`], and
/// ignored for [`ScheduleType::Once`] (which always yields `None`).
pub fn compute_next_run(
    schedule_type: ScheduleType,
    schedule_value: &str,
    timezone: &str,
) -> Result<Option<DateTime<Utc>>, NextRunError> {
    match schedule_type {
        ScheduleType::Once => Ok(None),
        ScheduleType::Interval => {
            let ms: i64 = schedule_value
                .parse()
                .map_err(|_| NextRunError::InvalidInterval(schedule_value.to_string()))?;
            Ok(Some(Utc::now() + chrono::Duration::milliseconds(ms)))
        }
        ScheduleType::Cron => {
            let tz: Tz = timezone
                .parse()
                .map_err(|_| NextRunError::UnknownTimezone(timezone.to_string()))?;
            let normalized = normalize_cron_expr(schedule_value);
            let schedule = Schedule::from_str(&normalized)
                .map_err(|e| NextRunError::InvalidCron(schedule_value.to_string(), e.to_string()))?;

            let now_local = Utc::now().with_timezone(&tz);
            let next_local = schedule
                .after(&now_local)
                .next()
                .ok_or_else(|| NextRunError::NoUpcomingOccurrence(schedule_value.to_string()))?;
            Ok(Some(next_local.with_timezone(&Utc)))
        }
    }
}

/// `cron`'s parser expects a leading seconds field (6–7 fields); spec.md's
/// scheduled-task expressions are standard 5-field crons (e.g. `"0 9 * * *"`,
/// spec.md §S2). Prepend a `"0 "` seconds field when given exactly 5 fields
/// so the spec's format parses instead of erroring out.
fn normalize_cron_expr(schedule_value: &str) -> String {
    if schedule_value.split_whitespace().count() == 5 {
        format!("0 {schedule_value}")
    } else {
        schedule_value.to_string()
    }
}

/// Used by `run-task`'s snapshot write to render `next_run`/`last_run` in the
/// group's configured local timezone (spec.md §4.6 "local-time rendering").
pub fn render_local(instant: DateTime<Utc>, timezone: &str) -> Option<String> {
    let tz: Tz = timezone.parse().ok()?;
    Some(instant.with_timezone(&tz).to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_task_always_yields_none() {
        assert_eq!(compute_next_run(ScheduleType::Once, "", "UTC").unwrap(), None);
    }

    #[test]
    fn interval_task_adds_milliseconds_to_now() {
        let before = Utc::now();
        let next = compute_next_run(ScheduleType::Interval, "60000", "UTC")
            .unwrap()
            .unwrap();
        assert!(next > before + chrono::Duration::seconds(55));
        assert!(next < before + chrono::Duration::seconds(65));
    }

    #[test]
    fn cron_task_computes_an_upcoming_occurrence() {
        // Standard 5-field cron, as spec.md §S2 seeds it ("0 9 * * *").
        let next = compute_next_run(ScheduleType::Cron, "0 9 * * *", "UTC").unwrap();
        assert!(next.is_some());
        assert!(next.unwrap() > Utc::now());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = compute_next_run(ScheduleType::Cron, "0 9 * * *", "Not/AZone").unwrap_err();
        assert!(matches!(err, NextRunError::UnknownTimezone(_)));
    }

    #[test]
    fn bad_interval_value_is_rejected() {
        let err = compute_next_run(ScheduleType::Interval, "not-a-number", "UTC").unwrap_err();
        assert!(matches!(err, NextRunError::InvalidInterval(_)));
    }
}
