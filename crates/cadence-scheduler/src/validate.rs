//! Schedule definition validation.
//!
//! Every rule is checked and every violation collected, so a caller sees the
//! whole list in one `SchedulerError::Validation`.

use crate::error::{Result, SchedulerError};
use crate::schedule::{parse_cron, MAX_INTERVAL_MINUTES};
use crate::types::{ReportSchedule, ScheduleType, SUPPORTED_OUTPUT_FORMATS};

/// Fields shared by `NewSchedule` and `ReportSchedule` that validation reads.
pub(crate) struct Definition<'a> {
    pub report_id: &'a str,
    pub tenant_id: &'a str,
    pub schedule_type: ScheduleType,
    pub config: &'a crate::types::ScheduleConfig,
    pub event_trigger_count: usize,
    pub threshold_trigger_count: usize,
    pub formats: &'a [String],
}

impl<'a> From<&'a crate::types::NewSchedule> for Definition<'a> {
    fn from(def: &'a crate::types::NewSchedule) -> Self {
        Self {
            report_id: &def.report_id,
            tenant_id: &def.tenant_id,
            schedule_type: def.schedule_type,
            config: &def.schedule_config,
            event_trigger_count: def.event_triggers.len(),
            threshold_trigger_count: def.threshold_triggers.len(),
            formats: &def.output_config.formats,
        }
    }
}

impl<'a> From<&'a ReportSchedule> for Definition<'a> {
    fn from(s: &'a ReportSchedule) -> Self {
        Self {
            report_id: &s.report_id,
            tenant_id: &s.tenant_id,
            schedule_type: s.schedule_type,
            config: &s.schedule_config,
            event_trigger_count: s.event_triggers.len(),
            threshold_trigger_count: s.threshold_triggers.len(),
            formats: &s.output_config.formats,
        }
    }
}

/// Return the list of violated rules; empty means valid.
pub(crate) fn violations(def: &Definition<'_>) -> Vec<String> {
    let mut out = Vec::new();
    let config = def.config;

    if def.report_id.trim().is_empty() {
        out.push("report_id is required".to_string());
    }
    if def.tenant_id.trim().is_empty() {
        out.push("tenant_id is required".to_string());
    }

    match def.schedule_type {
        ScheduleType::Cron => match config.cron.as_deref() {
            None => out.push("cron schedules require schedule_config.cron".to_string()),
            Some(expr) => {
                if let Err(e) = parse_cron(expr) {
                    out.push(format!("invalid cron expression '{expr}': {e}"));
                }
            }
        },
        ScheduleType::Interval => match config.interval_minutes {
            None => {
                out.push("interval schedules require schedule_config.interval_minutes".to_string())
            }
            Some(0) => out.push("schedule_config.interval_minutes must be > 0".to_string()),
            Some(m) if m > MAX_INTERVAL_MINUTES => out.push(format!(
                "schedule_config.interval_minutes must be <= {MAX_INTERVAL_MINUTES}"
            )),
            Some(_) => {}
        },
        ScheduleType::EventDriven => {
            if def.event_trigger_count == 0 {
                out.push("event_driven schedules require at least one event trigger".to_string());
            }
        }
        ScheduleType::Threshold => {
            if def.threshold_trigger_count == 0 {
                out.push("threshold schedules require at least one threshold trigger".to_string());
            }
        }
    }

    if let Some(tz) = config.timezone.as_deref() {
        if cadence_core::tz::parse_timezone(tz).is_err() {
            out.push(format!("unknown timezone '{tz}'"));
        }
    }

    for format in def.formats {
        if !SUPPORTED_OUTPUT_FORMATS.contains(&format.as_str()) {
            out.push(format!(
                "unsupported output format '{format}' (expected one of {})",
                SUPPORTED_OUTPUT_FORMATS.join(", ")
            ));
        }
    }

    if let Some(retry) = &config.retry_config {
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            out.push("retry_config.backoff_multiplier must be >= 1".to_string());
        }
    }

    if let (Some(start), Some(end)) = (config.start_date, config.end_date) {
        if start >= end {
            out.push("schedule_config.start_date must be before end_date".to_string());
        }
    }

    out
}

/// Validate a definition, failing with every violated rule.
pub(crate) fn validate(def: &Definition<'_>) -> Result<()> {
    let v = violations(def);
    if v.is_empty() {
        Ok(())
    } else {
        Err(SchedulerError::validation(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewSchedule, RetryConfig};

    fn check(def: &NewSchedule) -> Vec<String> {
        violations(&Definition::from(def))
    }

    #[test]
    fn valid_cron_definition_passes() {
        let def = NewSchedule::cron("r1", "t1", "0 8 * * *")
            .with_timezone("Europe/Berlin")
            .with_formats(&["pdf", "csv"]);
        assert!(check(&def).is_empty());
    }

    #[test]
    fn reports_every_violation_not_just_the_first() {
        let mut def = NewSchedule::cron("", "", "0 8 * * *")
            .with_timezone("Nowhere/Land")
            .with_formats(&["pdf", "docx"]);
        def.schedule_config.cron = None;
        let v = check(&def);
        assert_eq!(v.len(), 5, "{v:?}");
        assert!(v.iter().any(|m| m.contains("report_id")));
        assert!(v.iter().any(|m| m.contains("tenant_id")));
        assert!(v.iter().any(|m| m.contains("schedule_config.cron")));
        assert!(v.iter().any(|m| m.contains("Nowhere/Land")));
        assert!(v.iter().any(|m| m.contains("docx")));
    }

    #[test]
    fn interval_must_be_positive() {
        let def = NewSchedule::interval("r", "t", 0);
        assert_eq!(check(&def), vec!["schedule_config.interval_minutes must be > 0"]);
    }

    #[test]
    fn interval_must_fit_the_calendar() {
        assert!(check(&NewSchedule::interval("r", "t", MAX_INTERVAL_MINUTES)).is_empty());
        for minutes in [MAX_INTERVAL_MINUTES + 1, 300_000_000_000, u64::MAX] {
            let v = check(&NewSchedule::interval("r", "t", minutes));
            assert_eq!(v.len(), 1, "{minutes}: {v:?}");
            assert!(v[0].contains("interval_minutes must be <="));
        }
    }

    #[test]
    fn trigger_lists_must_be_non_empty() {
        assert_eq!(check(&NewSchedule::event_driven("r", "t", vec![])).len(), 1);
        assert_eq!(check(&NewSchedule::threshold("r", "t", vec![])).len(), 1);
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let def = NewSchedule::interval("r", "t", 5).with_retry(RetryConfig {
            max_retries: 3,
            retry_delay_minutes: 1,
            backoff_multiplier: 0.5,
        });
        assert_eq!(check(&def).len(), 1);
    }

    #[test]
    fn validate_wraps_into_error() {
        let def = NewSchedule::cron("r", "t", "61 * * * *");
        let err = validate(&Definition::from(&def)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
