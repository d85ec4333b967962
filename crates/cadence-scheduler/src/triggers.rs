//! Event-driven and threshold trigger matching.
//!
//! The event bus and metric monitor live outside the scheduler. They learn
//! which schedules care about what through a [`TriggerRegistrar`] and call
//! back into `SchedulerEngine::handle_event` / `handle_metric`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{EventTrigger, ReportSchedule, ScheduleType, ThresholdTrigger};

/// An event delivered by the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotice {
    pub module: String,
    pub event: String,
    /// Restricts matching to one tenant's schedules when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventNotice {
    pub fn new(module: &str, event: &str, payload: serde_json::Value) -> Self {
        Self {
            module: module.to_string(),
            event: event.to_string(),
            tenant_id: None,
            payload,
        }
    }

    pub fn for_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }
}

/// A metric sample delivered by the threshold monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub metric: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl MetricReading {
    pub fn new(metric: &str, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            value,
            tenant_id: None,
        }
    }

    pub fn for_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }
}

/// Module and event must match; each condition key must equal the payload
/// field of the same name.
pub fn event_matches(trigger: &EventTrigger, notice: &EventNotice) -> bool {
    if trigger.module != notice.module || trigger.event != notice.event {
        return false;
    }
    trigger
        .conditions
        .iter()
        .all(|(key, expected)| notice.payload.get(key) == Some(expected))
}

pub fn threshold_matches(trigger: &ThresholdTrigger, reading: &MetricReading) -> bool {
    trigger.metric == reading.metric && trigger.operator.compare(reading.value, trigger.value)
}

fn tenant_allows(schedule: &ReportSchedule, tenant_id: Option<&str>) -> bool {
    tenant_id.map_or(true, |t| t == schedule.tenant_id)
}

/// Whether an active event-driven schedule should fire for `notice`.
pub fn schedule_wants_event(schedule: &ReportSchedule, notice: &EventNotice) -> bool {
    schedule.is_active
        && schedule.schedule_type == ScheduleType::EventDriven
        && tenant_allows(schedule, notice.tenant_id.as_deref())
        && schedule.event_triggers.iter().any(|t| event_matches(t, notice))
}

/// Whether an active threshold schedule should fire for `reading`.
pub fn schedule_wants_metric(schedule: &ReportSchedule, reading: &MetricReading) -> bool {
    schedule.is_active
        && schedule.schedule_type == ScheduleType::Threshold
        && tenant_allows(schedule, reading.tenant_id.as_deref())
        && schedule.threshold_triggers.iter().any(|t| threshold_matches(t, reading))
}

/// Receives subscription changes so an external bus / monitor can start or
/// stop delivering callbacks for a schedule.
pub trait TriggerRegistrar: Send + Sync {
    fn register(&self, schedule: &ReportSchedule);
    fn unregister(&self, schedule_id: &str);
}

/// Registrar that only logs; used when no external bus is wired in.
#[derive(Debug, Default)]
pub struct LoggingRegistrar;

impl TriggerRegistrar for LoggingRegistrar {
    fn register(&self, schedule: &ReportSchedule) {
        match schedule.schedule_type {
            ScheduleType::EventDriven => {
                for t in &schedule.event_triggers {
                    info!(
                        schedule_id = %schedule.id,
                        module = %t.module,
                        event = %t.event,
                        "event trigger registered"
                    );
                }
            }
            ScheduleType::Threshold => {
                for t in &schedule.threshold_triggers {
                    info!(
                        schedule_id = %schedule.id,
                        metric = %t.metric,
                        value = t.value,
                        check_interval_minutes = t.check_interval_minutes,
                        "threshold trigger registered"
                    );
                }
            }
            ScheduleType::Cron | ScheduleType::Interval => {}
        }
    }

    fn unregister(&self, schedule_id: &str) {
        info!(schedule_id, "triggers unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewSchedule, ThresholdOperator};
    use chrono::Utc;
    use serde_json::json;

    fn invoice_trigger() -> EventTrigger {
        EventTrigger {
            module: "billing".to_string(),
            event: "invoice_paid".to_string(),
            conditions: [("currency".to_string(), json!("EUR"))].into_iter().collect(),
        }
    }

    #[test]
    fn event_conditions_must_all_match() {
        let t = invoice_trigger();
        assert!(event_matches(
            &t,
            &EventNotice::new("billing", "invoice_paid", json!({"currency": "EUR", "amount": 10}))
        ));
        assert!(!event_matches(
            &t,
            &EventNotice::new("billing", "invoice_paid", json!({"currency": "USD"}))
        ));
        assert!(!event_matches(&t, &EventNotice::new("billing", "invoice_paid", json!(null))));
        assert!(!event_matches(
            &t,
            &EventNotice::new("crm", "invoice_paid", json!({"currency": "EUR"}))
        ));
    }

    #[test]
    fn tenant_scoping_and_activity_are_respected() {
        let mut schedule = crate::types::ReportSchedule::from_definition(
            NewSchedule::event_driven("r", "acme", vec![invoice_trigger()]),
            Utc::now(),
        );
        let notice = EventNotice::new("billing", "invoice_paid", json!({"currency": "EUR"}));
        assert!(schedule_wants_event(&schedule, &notice));
        assert!(schedule_wants_event(&schedule, &notice.clone().for_tenant("acme")));
        assert!(!schedule_wants_event(&schedule, &notice.clone().for_tenant("globex")));
        schedule.is_active = false;
        assert!(!schedule_wants_event(&schedule, &notice));
    }

    #[test]
    fn threshold_matching() {
        let trigger = ThresholdTrigger {
            metric: "error_rate".to_string(),
            operator: ThresholdOperator::Gt,
            value: 0.05,
            check_interval_minutes: 1,
        };
        let schedule = crate::types::ReportSchedule::from_definition(
            NewSchedule::threshold("r", "t", vec![trigger]),
            Utc::now(),
        );
        assert!(schedule_wants_metric(&schedule, &MetricReading::new("error_rate", 0.2)));
        assert!(!schedule_wants_metric(&schedule, &MetricReading::new("error_rate", 0.01)));
        assert!(!schedule_wants_metric(&schedule, &MetricReading::new("latency", 0.2)));
    }
}
