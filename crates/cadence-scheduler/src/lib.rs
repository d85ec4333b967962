//! `cadence-scheduler` — report scheduling and priority execution queue.
//!
//! # Overview
//!
//! Schedules live in memory inside a [`engine::SchedulerEngine`]. Cron and
//! interval schedules hold one entry in a shared timer queue; when it fires an
//! execution is queued by priority and the timer re-arms. A queue tick
//! promotes pending executions to running under a global concurrency cap and
//! hands them to a [`report::ReportEngine`]. Failures are retried with
//! exponential backoff through one-shot timers in the same queue.
//!
//! # Schedule types
//!
//! | Type           | Fires when                                          |
//! |----------------|-----------------------------------------------------|
//! | `Cron`         | Cron expression matches, evaluated in its timezone  |
//! | `Interval`     | Every N minutes                                     |
//! | `EventDriven`  | A matching event reaches `handle_event`             |
//! | `Threshold`    | A metric reading crosses a threshold                |
//!
//! A [`repository::SqliteRepository`] can be attached to persist schedules and
//! execution records; [`SchedulerEngine::restore`] re-arms timers at startup.

pub mod db;
pub mod engine;
pub mod error;
pub mod offpeak;
pub mod queue;
pub mod report;
pub mod repository;
pub mod retry;
pub mod schedule;
pub mod timers;
pub mod triggers;
pub mod types;
mod validate;

pub use engine::{Dispatched, QueueStatus, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use report::{ExecutionFailure, ReportEngine, ReportOutput, ReportRequest};
pub use repository::{ScheduleRepository, SqliteRepository};
pub use triggers::{EventNotice, LoggingRegistrar, MetricReading, TriggerRegistrar};
pub use types::{
    EventTrigger, ExecutionStatus, ExecutionTrigger, NewSchedule, OutputConfig, ReportSchedule,
    ResourcePriority, RetryConfig, ScheduleConfig, ScheduleExecution, ScheduleType,
    ScheduleUpdate, ThresholdOperator, ThresholdTrigger,
};
