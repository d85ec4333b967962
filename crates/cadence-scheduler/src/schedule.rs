use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::types::{ReportSchedule, ScheduleType};

/// Longest accepted interval, one hundred years.
pub const MAX_INTERVAL_MINUTES: u64 = 100 * 366 * 24 * 60;

/// `minutes` as a duration, or `None` when it is zero or above
/// [`MAX_INTERVAL_MINUTES`].
pub fn interval_duration(minutes: u64) -> Option<Duration> {
    if minutes == 0 || minutes > MAX_INTERVAL_MINUTES {
        return None;
    }
    Duration::try_minutes(i64::try_from(minutes).ok()?)
}

/// Normalize a 5-field cron expression to 6 fields by prepending a seconds
/// column. The `cron` crate requires `sec min hour dom month dow`.
pub(crate) fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Parse a 5- or 6-field cron expression.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, String> {
    cron::Schedule::from_str(&normalize_cron(expr)).map_err(|e| e.to_string())
}

/// Next occurrence of `expr` strictly after `after`, evaluated in `tz`.
pub fn next_cron_occurrence(
    expr: &str,
    tz: Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let schedule = match parse_cron(expr) {
        Ok(s) => s,
        Err(e) => {
            warn!(expression = %expr, error = %e, "unparseable cron expression");
            return None;
        }
    };
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Compute the next execution time for `schedule` as seen at `now`.
///
/// Returns `None` for event-driven and threshold schedules (no polling
/// clock), for schedules past their `end_date` or `max_executions`, and for
/// cron expressions that never fire again.
pub fn compute_next_execution(
    schedule: &ReportSchedule,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let config = &schedule.schedule_config;
    if schedule.is_exhausted() {
        return None;
    }

    let start = config.start_date.filter(|s| *s > now);

    let next = match schedule.schedule_type {
        ScheduleType::Cron => {
            let expr = config.cron.as_deref()?;
            let tz = match cadence_core::tz::timezone_or_utc(config.timezone.as_deref()) {
                Ok(tz) => tz,
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "falling back to UTC");
                    Tz::UTC
                }
            };
            // A future start date is itself a valid fire time.
            let reference = start
                .and_then(|s| s.checked_sub_signed(Duration::seconds(1)))
                .unwrap_or(now);
            next_cron_occurrence(expr, tz, reference)?
        }
        ScheduleType::Interval => {
            let step = config.interval_minutes.and_then(interval_duration)?;
            match start {
                Some(s) => s,
                None => now.checked_add_signed(step)?,
            }
        }
        ScheduleType::EventDriven | ScheduleType::Threshold => return None,
    };

    match config.end_date {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewSchedule;
    use chrono::{TimeZone, Timelike};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn normalizes_five_field_expressions() {
        assert_eq!(normalize_cron("0 8 * * *"), "0 0 8 * * *");
        assert_eq!(normalize_cron(" 30 0 8 * * * "), "30 0 8 * * *");
        assert!(parse_cron("*/15 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn cron_next_in_utc() {
        let now = at(2026, 2, 22, 7, 0);
        let schedule =
            ReportSchedule::from_definition(NewSchedule::cron("r", "t", "0 8 * * *"), now);
        let next = compute_next_execution(&schedule, now).unwrap();
        assert_eq!(next, at(2026, 2, 22, 8, 0));
    }

    #[test]
    fn cron_respects_timezone() {
        // 08:00 in Manila (UTC+8) is 00:00 UTC.
        let now = at(2026, 2, 22, 12, 0);
        let schedule = ReportSchedule::from_definition(
            NewSchedule::cron("r", "t", "0 8 * * *").with_timezone("Asia/Manila"),
            now,
        );
        let next = compute_next_execution(&schedule, now).unwrap();
        assert_eq!(next, at(2026, 2, 23, 0, 0));
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn interval_adds_minutes() {
        let now = at(2026, 2, 22, 10, 2);
        let schedule = ReportSchedule::from_definition(NewSchedule::interval("r", "t", 30), now);
        assert_eq!(compute_next_execution(&schedule, now), Some(at(2026, 2, 22, 10, 32)));
    }

    #[test]
    fn oversized_interval_has_no_next_time() {
        let now = at(2026, 2, 22, 10, 2);
        for minutes in [MAX_INTERVAL_MINUTES + 1, 300_000_000_000, u64::MAX] {
            let schedule =
                ReportSchedule::from_definition(NewSchedule::interval("r", "t", minutes), now);
            assert_eq!(compute_next_execution(&schedule, now), None, "{minutes}");
        }
        assert_eq!(
            interval_duration(MAX_INTERVAL_MINUTES),
            Some(Duration::minutes(MAX_INTERVAL_MINUTES as i64))
        );
        assert_eq!(interval_duration(0), None);
    }

    #[test]
    fn future_start_date_is_first_fire() {
        let now = at(2026, 2, 22, 10, 0);
        let mut def = NewSchedule::interval("r", "t", 30);
        def.schedule_config.start_date = Some(at(2026, 3, 1, 9, 0));
        let schedule = ReportSchedule::from_definition(def, now);
        assert_eq!(compute_next_execution(&schedule, now), Some(at(2026, 3, 1, 9, 0)));
    }

    #[test]
    fn end_date_and_exhaustion_stop_the_clock() {
        let now = at(2026, 2, 22, 10, 0);
        let mut def = NewSchedule::interval("r", "t", 60);
        def.schedule_config.end_date = Some(at(2026, 2, 22, 10, 30));
        let schedule = ReportSchedule::from_definition(def, now);
        assert_eq!(compute_next_execution(&schedule, now), None);

        let mut def = NewSchedule::interval("r", "t", 60);
        def.schedule_config.max_executions = Some(2);
        let mut schedule = ReportSchedule::from_definition(def, now);
        schedule.execution_count = 2;
        assert_eq!(compute_next_execution(&schedule, now), None);
    }

    #[test]
    fn event_schedules_have_no_next_time() {
        let now = Utc::now();
        let schedule =
            ReportSchedule::from_definition(NewSchedule::event_driven("r", "t", vec![]), now);
        assert_eq!(compute_next_execution(&schedule, now), None);
    }
}
