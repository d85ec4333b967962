use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output formats the report engine can produce.
pub const SUPPORTED_OUTPUT_FORMATS: [&str; 4] = ["pdf", "excel", "csv", "json"];

/// Trigger mechanism of a schedule. Exactly one applies per schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Fires according to `schedule_config.cron`.
    Cron,
    /// Fires every `schedule_config.interval_minutes`.
    Interval,
    /// Fires when a matching event is delivered via `handle_event`.
    EventDriven,
    /// Fires when a metric reading crosses a threshold.
    Threshold,
}

impl ScheduleType {
    /// Whether this type is driven by the timer queue (it has a predictable
    /// next execution time).
    pub fn is_timer_based(&self) -> bool {
        matches!(self, ScheduleType::Cron | ScheduleType::Interval)
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::EventDriven => "event_driven",
            ScheduleType::Threshold => "threshold",
        };
        write!(f, "{s}")
    }
}

/// Default execution priority of a schedule.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl ResourcePriority {
    /// Integer queue priority: low=1 … critical=4. Higher runs first.
    pub fn level(&self) -> u8 {
        match self {
            ResourcePriority::Low => 1,
            ResourcePriority::Normal => 2,
            ResourcePriority::High => 3,
            ResourcePriority::Critical => 4,
        }
    }
}

impl std::fmt::Display for ResourcePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourcePriority::Low => "low",
            ResourcePriority::Normal => "normal",
            ResourcePriority::High => "high",
            ResourcePriority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResourcePriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(ResourcePriority::Low),
            "normal" => Ok(ResourcePriority::Normal),
            "high" => Ok(ResourcePriority::High),
            "critical" => Ok(ResourcePriority::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Retry policy for failed executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed per originating failure (0 disables retrying).
    pub max_retries: u32,
    /// Base delay before the first retry, in minutes.
    pub retry_delay_minutes: u64,
    /// Growth factor applied per attempt; must be >= 1.
    pub backoff_multiplier: f64,
}

/// Trigger parameters. Which fields matter depends on [`ScheduleType`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// 5-field (or 6-field with seconds) cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
    /// IANA timezone the cron expression is evaluated in. UTC when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// No fire happens before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// No fire happens after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Preferred during the off-peak window.
    #[serde(default)]
    pub off_peak_only: bool,
    /// Stop re-arming once `execution_count` reaches this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,
}

/// Fires an event-driven schedule when `module`/`event` match and every
/// condition key equals the corresponding payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub module: String,
    pub event: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, serde_json::Value>,
}

/// Comparison applied by a threshold trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl ThresholdOperator {
    pub fn compare(&self, actual: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Gt => actual > threshold,
            ThresholdOperator::Gte => actual >= threshold,
            ThresholdOperator::Lt => actual < threshold,
            ThresholdOperator::Lte => actual <= threshold,
            ThresholdOperator::Eq => (actual - threshold).abs() < f64::EPSILON,
            ThresholdOperator::Ne => (actual - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// Fires a threshold schedule when `metric <operator> value` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTrigger {
    pub metric: String,
    pub operator: ThresholdOperator,
    pub value: f64,
    /// How often the external monitor should sample the metric.
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,
}

fn default_check_interval() -> u64 {
    5
}

/// Export formats and delivery targets. Opaque to the scheduler apart from
/// format validation; passed through to the report engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<serde_json::Value>,
}

/// A persistent definition of when and how a report repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub id: String,
    pub report_id: String,
    pub tenant_id: String,
    pub schedule_type: ScheduleType,
    pub schedule_config: ScheduleConfig,
    #[serde(default)]
    pub event_triggers: Vec<EventTrigger>,
    #[serde(default)]
    pub threshold_triggers: Vec<ThresholdTrigger>,
    #[serde(default)]
    pub output_config: OutputConfig,
    /// Report parameters forwarded verbatim to the report engine.
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub resource_priority: ResourcePriority,
    pub is_active: bool,
    pub last_execution: Option<DateTime<Utc>>,
    /// `None` for event-driven and threshold schedules.
    pub next_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportSchedule {
    /// Build a schedule from a validated definition with zeroed counters.
    pub(crate) fn from_definition(def: NewSchedule, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            report_id: def.report_id,
            tenant_id: def.tenant_id,
            schedule_type: def.schedule_type,
            schedule_config: def.schedule_config,
            event_triggers: def.event_triggers,
            threshold_triggers: def.threshold_triggers,
            output_config: def.output_config,
            parameters: def.parameters,
            resource_priority: def.resource_priority,
            is_active: def.is_active,
            last_execution: None,
            next_execution: None,
            execution_count: 0,
            success_count: 0,
            error_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this schedule should hold a recurring timer.
    pub fn wants_timer(&self) -> bool {
        self.is_active && self.schedule_type.is_timer_based()
    }

    /// Whether `max_executions` has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.schedule_config
            .max_executions
            .is_some_and(|max| self.execution_count >= max)
    }

    /// Apply a partial update. Fields left as `None` keep their value.
    pub(crate) fn apply(&mut self, update: ScheduleUpdate, now: DateTime<Utc>) {
        if let Some(v) = update.report_id {
            self.report_id = v;
        }
        if let Some(v) = update.schedule_type {
            self.schedule_type = v;
        }
        if let Some(v) = update.schedule_config {
            self.schedule_config = v;
        }
        if let Some(v) = update.event_triggers {
            self.event_triggers = v;
        }
        if let Some(v) = update.threshold_triggers {
            self.threshold_triggers = v;
        }
        if let Some(v) = update.output_config {
            self.output_config = v;
        }
        if let Some(v) = update.parameters {
            self.parameters = v;
        }
        if let Some(v) = update.resource_priority {
            self.resource_priority = v;
        }
        if let Some(v) = update.is_active {
            self.is_active = v;
        }
        self.updated_at = now;
    }
}

/// Input to `create_schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub report_id: String,
    pub tenant_id: String,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub schedule_config: ScheduleConfig,
    #[serde(default)]
    pub event_triggers: Vec<EventTrigger>,
    #[serde(default)]
    pub threshold_triggers: Vec<ThresholdTrigger>,
    #[serde(default)]
    pub output_config: OutputConfig,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub resource_priority: ResourcePriority,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl NewSchedule {
    fn base(report_id: &str, tenant_id: &str, schedule_type: ScheduleType) -> Self {
        Self {
            report_id: report_id.to_string(),
            tenant_id: tenant_id.to_string(),
            schedule_type,
            schedule_config: ScheduleConfig::default(),
            event_triggers: Vec::new(),
            threshold_triggers: Vec::new(),
            output_config: OutputConfig::default(),
            parameters: serde_json::Value::Null,
            resource_priority: ResourcePriority::Normal,
            is_active: true,
        }
    }

    pub fn cron(report_id: &str, tenant_id: &str, expression: &str) -> Self {
        let mut def = Self::base(report_id, tenant_id, ScheduleType::Cron);
        def.schedule_config.cron = Some(expression.to_string());
        def
    }

    pub fn interval(report_id: &str, tenant_id: &str, minutes: u64) -> Self {
        let mut def = Self::base(report_id, tenant_id, ScheduleType::Interval);
        def.schedule_config.interval_minutes = Some(minutes);
        def
    }

    pub fn event_driven(report_id: &str, tenant_id: &str, triggers: Vec<EventTrigger>) -> Self {
        let mut def = Self::base(report_id, tenant_id, ScheduleType::EventDriven);
        def.event_triggers = triggers;
        def
    }

    pub fn threshold(report_id: &str, tenant_id: &str, triggers: Vec<ThresholdTrigger>) -> Self {
        let mut def = Self::base(report_id, tenant_id, ScheduleType::Threshold);
        def.threshold_triggers = triggers;
        def
    }

    pub fn with_priority(mut self, priority: ResourcePriority) -> Self {
        self.resource_priority = priority;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.schedule_config.retry_config = Some(retry);
        self
    }

    pub fn with_timezone(mut self, tz: &str) -> Self {
        self.schedule_config.timezone = Some(tz.to_string());
        self
    }

    pub fn with_formats(mut self, formats: &[&str]) -> Self {
        self.output_config.formats = formats.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn off_peak_only(mut self) -> Self {
        self.schedule_config.off_peak_only = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Partial update merged over an existing schedule by `update_schedule`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub report_id: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub schedule_config: Option<ScheduleConfig>,
    pub event_triggers: Option<Vec<EventTrigger>>,
    pub threshold_triggers: Option<Vec<ThresholdTrigger>>,
    pub output_config: Option<OutputConfig>,
    pub parameters: Option<serde_json::Value>,
    pub resource_priority: Option<ResourcePriority>,
    pub is_active: Option<bool>,
}

/// Lifecycle state of one execution attempt.
///
/// `Pending → Running → {Completed | Failed | Cancelled}`. Terminal states are
/// never left; a retry is a new execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// What caused an execution to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    Scheduled,
    Manual,
    Event,
    Threshold,
    Retry,
}

/// Failure details captured from the report engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub code: String,
}

/// Observability only; not enforced as a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_time_ms: u64,
    pub memory_peak_bytes: u64,
    pub disk_io_bytes: u64,
}

/// One attempt to run a schedule's report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecution {
    /// Fresh per attempt; retries never reuse an id.
    pub id: String,
    pub schedule_id: String,
    pub report_id: String,
    pub tenant_id: String,
    pub status: ExecutionStatus,
    /// Fixed at creation (1 = low … 4 = critical).
    pub priority: u8,
    /// Position in the pending queue at the last queue mutation; informational.
    pub queue_position: Option<usize>,
    pub trigger: ExecutionTrigger,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<u64>,
    pub record_count: Option<u64>,
    #[serde(default)]
    pub output_files: Vec<String>,
    /// 0 for the first attempt of a logical execution.
    pub retry_attempt: u32,
    pub error: Option<ExecutionError>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
}

impl ScheduleExecution {
    pub fn new(
        schedule: &ReportSchedule,
        priority: u8,
        trigger: ExecutionTrigger,
        retry_attempt: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            report_id: schedule.report_id.clone(),
            tenant_id: schedule.tenant_id.clone(),
            status: ExecutionStatus::Pending,
            priority,
            queue_position: None,
            trigger,
            created_at: now,
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            record_count: None,
            output_files: Vec::new(),
            retry_attempt,
            error: None,
            resource_usage: ResourceUsage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_levels_are_ordered() {
        assert_eq!(ResourcePriority::Low.level(), 1);
        assert_eq!(ResourcePriority::Normal.level(), 2);
        assert_eq!(ResourcePriority::High.level(), 3);
        assert_eq!(ResourcePriority::Critical.level(), 4);
        assert_eq!("critical".parse::<ResourcePriority>().unwrap(), ResourcePriority::Critical);
        assert!("urgent".parse::<ResourcePriority>().is_err());
    }

    #[test]
    fn threshold_operators_serialize_as_symbols() {
        let trigger: ThresholdTrigger =
            serde_json::from_str(r#"{"metric":"queue_depth","operator":">=","value":10}"#).unwrap();
        assert_eq!(trigger.operator, ThresholdOperator::Gte);
        assert_eq!(trigger.check_interval_minutes, 5);
        assert!(trigger.operator.compare(10.0, 10.0));
        assert!(!ThresholdOperator::Gt.compare(10.0, 10.0));
    }

    #[test]
    fn partial_update_keeps_untouched_fields() {
        let now = Utc::now();
        let mut schedule = ReportSchedule::from_definition(
            NewSchedule::interval("r1", "t1", 15).with_priority(ResourcePriority::High),
            now,
        );
        schedule.apply(
            ScheduleUpdate {
                is_active: Some(false),
                ..Default::default()
            },
            now,
        );
        assert!(!schedule.is_active);
        assert_eq!(schedule.resource_priority, ResourcePriority::High);
        assert_eq!(schedule.schedule_config.interval_minutes, Some(15));
    }

    #[test]
    fn execution_status_round_trips_through_strings() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }
}
