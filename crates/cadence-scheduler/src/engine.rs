use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use cadence_core::SchedulerConfig;

use crate::{
    error::{Result, SchedulerError},
    offpeak::OffPeakWindow,
    queue::ExecutionQueue,
    report::{ExecutionFailure, ReportEngine, ReportOutput, ReportRequest},
    repository::ScheduleRepository,
    retry::{decide, RetryDecision},
    schedule::compute_next_execution,
    timers::{RetryTimer, TimerKind, TimerQueue},
    triggers::{
        schedule_wants_event, schedule_wants_metric, EventNotice, LoggingRegistrar,
        MetricReading, TriggerRegistrar,
    },
    types::{
        ExecutionStatus, ExecutionTrigger, NewSchedule, ReportSchedule, ResourcePriority,
        ScheduleExecution, ScheduleUpdate,
    },
    validate::validate,
};

/// Longest the driver loop sleeps when no timer is armed.
const IDLE_TIMER_WAIT: std::time::Duration = std::time::Duration::from_secs(60);

/// Snapshot of the queue processor for dashboards and health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub running: usize,
    pub max_concurrent: usize,
    /// Schedules holding a recurring timer.
    pub timers_armed: usize,
    /// One-shot retry timers waiting for their backoff to elapse.
    pub retries_scheduled: usize,
    pub off_peak_active: bool,
}

/// An execution promoted to running by [`SchedulerEngine::process_queue`].
///
/// The handle resolves once the result has been recorded.
#[derive(Debug)]
pub struct Dispatched {
    pub execution_id: String,
    pub handle: JoinHandle<()>,
}

/// All mutable bookkeeping, guarded by one lock.
#[derive(Default)]
struct SchedulerState {
    schedules: HashMap<String, ReportSchedule>,
    queue: ExecutionQueue,
    running: HashMap<String, ScheduleExecution>,
    timers: TimerQueue,
    /// Finished executions, oldest first.
    history: VecDeque<ScheduleExecution>,
}

impl SchedulerState {
    /// Pending or running work exists for the schedule.
    fn in_flight(&self, schedule_id: &str) -> bool {
        self.queue.contains_schedule(schedule_id)
            || self.running.values().any(|e| e.schedule_id == schedule_id)
    }

    fn enqueue(
        &mut self,
        schedule_id: &str,
        priority: u8,
        trigger: ExecutionTrigger,
        retry_attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<ScheduleExecution> {
        let schedule = self
            .schedules
            .get(schedule_id)
            .ok_or_else(|| SchedulerError::not_found(schedule_id))?;
        let mut execution = ScheduleExecution::new(schedule, priority, trigger, retry_attempt, now);
        let position = self.queue.enqueue(execution.clone());
        execution.queue_position = Some(position);
        debug!(
            execution_id = %execution.id,
            schedule_id,
            priority,
            position,
            ?trigger,
            "execution queued"
        );
        Ok(execution)
    }

    fn record_finished(&mut self, execution: ScheduleExecution, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(execution);
    }
}

/// Schedules reports, queues their executions and runs them through a
/// [`ReportEngine`] under a global concurrency cap.
///
/// All state lives in memory behind one async mutex. A repository, when
/// attached, mirrors schedules and execution records so [`restore`] can
/// rebuild timers after a restart.
///
/// [`restore`]: SchedulerEngine::restore
pub struct SchedulerEngine {
    config: SchedulerConfig,
    off_peak: OffPeakWindow,
    report_engine: Arc<dyn ReportEngine>,
    repository: Option<Arc<dyn ScheduleRepository>>,
    registrar: Arc<dyn TriggerRegistrar>,
    state: Mutex<SchedulerState>,
    /// Wakes the driver loop when a timer is armed.
    timer_armed: Notify,
}

impl SchedulerEngine {
    pub fn new(config: SchedulerConfig, report_engine: Arc<dyn ReportEngine>) -> Result<Self> {
        let off_peak = OffPeakWindow::from_config(&config.off_peak)?;
        Ok(Self {
            config,
            off_peak,
            report_engine,
            repository: None,
            registrar: Arc::new(LoggingRegistrar),
            state: Mutex::new(SchedulerState::default()),
            timer_armed: Notify::new(),
        })
    }

    pub fn with_repository(mut self, repository: Arc<dyn ScheduleRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn TriggerRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // --- schedule store ----------------------------------------------------

    /// Validate and store a new schedule, arming its timer when it is an
    /// active cron or interval schedule.
    #[instrument(skip(self, definition), fields(report_id = %definition.report_id, tenant_id = %definition.tenant_id))]
    pub async fn create_schedule(&self, definition: NewSchedule) -> Result<ReportSchedule> {
        validate(&(&definition).into())?;
        let now = Utc::now();
        let mut schedule = ReportSchedule::from_definition(definition, now);
        schedule.next_execution = next_for(&schedule, now);
        self.save_schedule(&schedule)?;

        let mut state = self.state.lock().await;
        state.schedules.insert(schedule.id.clone(), schedule.clone());
        self.arm(&mut state, &schedule, now);
        drop(state);

        self.register_triggers(&schedule);
        info!(
            schedule_id = %schedule.id,
            schedule_type = %schedule.schedule_type,
            next_execution = ?schedule.next_execution,
            "schedule created"
        );
        Ok(schedule)
    }

    /// Merge `update` over the stored schedule. Nothing changes when the
    /// merged definition is invalid.
    #[instrument(skip(self, update), fields(schedule_id = %id))]
    pub async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<ReportSchedule> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let previous = state
            .schedules
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::not_found(id))?;

        let mut schedule = previous.clone();
        schedule.apply(update, now);
        validate(&(&schedule).into())?;
        schedule.next_execution = next_for(&schedule, now);
        self.save_schedule(&schedule)?;

        state.timers.clear(id);
        state.schedules.insert(id.to_string(), schedule.clone());
        self.arm(&mut state, &schedule, now);
        drop(state);

        if !previous.schedule_type.is_timer_based() {
            self.registrar.unregister(id);
        }
        self.register_triggers(&schedule);
        info!(next_execution = ?schedule.next_execution, is_active = schedule.is_active, "schedule updated");
        Ok(schedule)
    }

    /// Remove a schedule together with its timers and queued work. Running
    /// executions are marked cancelled and stop occupying a slot; whatever
    /// the report engine eventually returns for them is discarded.
    #[instrument(skip(self), fields(schedule_id = %id))]
    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(schedule_type) = state.schedules.get(id).map(|s| s.schedule_type) else {
            return Err(SchedulerError::not_found(id));
        };
        if let Some(repo) = &self.repository {
            repo.delete_schedule(id)?;
        }

        state.timers.clear(id);
        let retries = state.timers.clear_retries(id);

        let mut cancelled = state.queue.remove_for_schedule(id);
        let running_ids: Vec<String> = state
            .running
            .values()
            .filter(|e| e.schedule_id == id)
            .map(|e| e.id.clone())
            .collect();
        let running = running_ids.len();
        for execution_id in running_ids {
            if let Some(execution) = state.running.remove(&execution_id) {
                cancelled.push(execution);
            }
        }
        let pending = cancelled.len() - running;
        for mut execution in cancelled {
            execution.status = ExecutionStatus::Cancelled;
            execution.queue_position = None;
            execution.completed_at = Some(now);
            state.record_finished(execution, self.config.history_limit);
        }
        state.schedules.remove(id);
        drop(state);

        if !schedule_type.is_timer_based() {
            self.registrar.unregister(id);
        }
        info!(pending, running, retries, "schedule deleted");
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<ReportSchedule> {
        let state = self.state.lock().await;
        state
            .schedules
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::not_found(id))
    }

    /// All schedules, optionally restricted to one tenant, oldest first.
    pub async fn list_schedules(&self, tenant_id: Option<&str>) -> Vec<ReportSchedule> {
        let state = self.state.lock().await;
        let mut schedules: Vec<ReportSchedule> = state
            .schedules
            .values()
            .filter(|s| tenant_id.map_or(true, |t| s.tenant_id == t))
            .cloned()
            .collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        schedules
    }

    /// Reload persisted schedules, recompute stale next-execution times and
    /// re-arm timers. Returns the number of schedules restored.
    pub async fn restore(&self) -> Result<usize> {
        let Some(repo) = &self.repository else {
            return Ok(0);
        };
        let loaded = repo.load_schedules()?;
        let now = Utc::now();
        let mut restored = Vec::with_capacity(loaded.len());

        let mut state = self.state.lock().await;
        for mut schedule in loaded {
            let stale = schedule.next_execution.map_or(true, |t| t <= now);
            if stale {
                let next = next_for(&schedule, now);
                if next != schedule.next_execution {
                    debug!(schedule_id = %schedule.id, previous = ?schedule.next_execution, next = ?next, "recomputed stale next execution");
                    schedule.next_execution = next;
                    self.save_schedule_logged(&schedule);
                }
            }
            self.arm(&mut state, &schedule, now);
            state.schedules.insert(schedule.id.clone(), schedule.clone());
            restored.push(schedule);
        }
        let armed = state.timers.recurring_len();
        drop(state);

        for schedule in &restored {
            self.register_triggers(schedule);
        }
        info!(count = restored.len(), armed, "schedules restored");
        Ok(restored.len())
    }

    // --- triggers ----------------------------------------------------------

    /// Queue one execution right away. Works for inactive schedules and never
    /// touches the recurring timer.
    #[instrument(skip(self), fields(schedule_id = %id))]
    pub async fn execute_schedule_now(
        &self,
        id: &str,
        priority: Option<ResourcePriority>,
    ) -> Result<ScheduleExecution> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let level = state
            .schedules
            .get(id)
            .map(|s| priority.unwrap_or(s.resource_priority).level())
            .ok_or_else(|| SchedulerError::not_found(id))?;
        let execution = state.enqueue(id, level, ExecutionTrigger::Manual, 0, now)?;
        self.save_execution_logged(&execution);
        drop(state);

        info!(execution_id = %execution.id, priority = level, "manual execution queued");
        Ok(execution)
    }

    /// Queue an execution for every active event-driven schedule matching
    /// `notice`.
    pub async fn handle_event(&self, notice: &EventNotice) -> Vec<ScheduleExecution> {
        let matching = |s: &ReportSchedule| schedule_wants_event(s, notice);
        let queued = self
            .enqueue_matching(matching, ExecutionTrigger::Event, Utc::now())
            .await;
        debug!(module = %notice.module, event = %notice.event, queued = queued.len(), "event handled");
        queued
    }

    /// Queue an execution for every active threshold schedule whose trigger
    /// holds for `reading`.
    pub async fn handle_metric(&self, reading: &MetricReading) -> Vec<ScheduleExecution> {
        let matching = |s: &ReportSchedule| schedule_wants_metric(s, reading);
        let queued = self
            .enqueue_matching(matching, ExecutionTrigger::Threshold, Utc::now())
            .await;
        debug!(metric = %reading.metric, value = reading.value, queued = queued.len(), "metric handled");
        queued
    }

    async fn enqueue_matching<F>(
        &self,
        matches: F,
        trigger: ExecutionTrigger,
        now: DateTime<Utc>,
    ) -> Vec<ScheduleExecution>
    where
        F: Fn(&ReportSchedule) -> bool,
    {
        let mut state = self.state.lock().await;
        let mut ids: Vec<(DateTime<Utc>, String, u8)> = state
            .schedules
            .values()
            .filter(|s| matches(*s))
            .map(|s| (s.created_at, s.id.clone(), s.resource_priority.level()))
            .collect();
        ids.sort();

        let mut queued = Vec::new();
        for (_, schedule_id, priority) in ids {
            if !self.config.allow_overlap && state.in_flight(&schedule_id) {
                info!(schedule_id = %schedule_id, ?trigger, "skipping fire: previous execution still in flight");
                continue;
            }
            match state.enqueue(&schedule_id, priority, trigger, 0, now) {
                Ok(execution) => {
                    self.save_execution_logged(&execution);
                    queued.push(execution);
                }
                Err(e) => warn!(schedule_id = %schedule_id, "trigger fire failed: {e}"),
            }
        }
        queued
    }

    // --- timers ------------------------------------------------------------

    /// Fire every timer due at `now`. Recurring fires enqueue a scheduled
    /// execution and re-arm; retry fires enqueue the retry attempt. Returns
    /// the executions queued.
    pub async fn fire_due_timers(&self, now: DateTime<Utc>) -> Vec<ScheduleExecution> {
        let mut state = self.state.lock().await;
        let fired = state.timers.pop_due(now);
        let mut queued = Vec::new();

        for timer in fired {
            let schedule_id = timer.kind.schedule_id().to_string();
            let result = match timer.kind {
                TimerKind::Recurring { .. } => self.fire_recurring(&mut state, &schedule_id, now),
                TimerKind::Retry(retry) => self.fire_retry(&mut state, retry, now).map(Some),
            };
            match result {
                Ok(Some(execution)) => {
                    self.save_execution_logged(&execution);
                    queued.push(execution);
                }
                Ok(None) => {}
                Err(e) => warn!(schedule_id = %schedule_id, due = %timer.due, code = e.code(), "timer fire failed: {e}"),
            }
        }
        queued
    }

    fn fire_recurring(
        &self,
        state: &mut SchedulerState,
        schedule_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleExecution>> {
        let schedule = state
            .schedules
            .get(schedule_id)
            .ok_or_else(|| SchedulerError::not_found(schedule_id))?;
        if !schedule.wants_timer() {
            debug!(schedule_id, "timer fired for inactive schedule; not re-armed");
            return Ok(None);
        }
        let priority = schedule.resource_priority.level();

        let execution = if !self.config.allow_overlap && state.in_flight(schedule_id) {
            info!(schedule_id, "skipping scheduled fire: previous execution still in flight");
            None
        } else {
            Some(state.enqueue(schedule_id, priority, ExecutionTrigger::Scheduled, 0, now)?)
        };

        let Some(schedule) = state.schedules.get_mut(schedule_id) else {
            return Ok(execution);
        };
        schedule.next_execution = next_for(schedule, now);
        schedule.updated_at = now;
        let schedule = schedule.clone();
        self.save_schedule_logged(&schedule);
        self.arm(state, &schedule, now);
        Ok(execution)
    }

    fn fire_retry(
        &self,
        state: &mut SchedulerState,
        retry: RetryTimer,
        now: DateTime<Utc>,
    ) -> Result<ScheduleExecution> {
        let execution = state.enqueue(
            &retry.schedule_id,
            retry.priority,
            ExecutionTrigger::Retry,
            retry.retry_attempt,
            now,
        )?;
        info!(
            execution_id = %execution.id,
            schedule_id = %retry.schedule_id,
            failed_execution_id = %retry.failed_execution_id,
            retry_attempt = retry.retry_attempt,
            "retry queued"
        );
        Ok(execution)
    }

    /// Arm the recurring timer when the schedule is active, timer-based and
    /// has a future next execution.
    fn arm(&self, state: &mut SchedulerState, schedule: &ReportSchedule, now: DateTime<Utc>) {
        if !schedule.wants_timer() {
            state.timers.clear(&schedule.id);
            return;
        }
        let Some(at) = schedule.next_execution else {
            state.timers.clear(&schedule.id);
            debug!(schedule_id = %schedule.id, "no further executions; timer not armed");
            return;
        };
        if state.timers.arm_recurring(&schedule.id, at, now) {
            self.timer_armed.notify_one();
        }
    }

    // --- queue processor ---------------------------------------------------

    /// Promote queued executions to running while slots are free. Each one
    /// runs on its own task; its result is recorded when the task finishes.
    pub async fn process_queue(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<Dispatched> {
        let mut dispatched = Vec::new();
        let mut state = self.state.lock().await;

        while state.running.len() < self.config.max_concurrent_executions {
            let Some(mut execution) = state.queue.dequeue() else {
                break;
            };
            let Some(schedule) = state.schedules.get(&execution.schedule_id) else {
                warn!(execution_id = %execution.id, schedule_id = %execution.schedule_id, "dropping execution of unknown schedule");
                continue;
            };
            let request = ReportRequest {
                execution_id: execution.id.clone(),
                schedule_id: execution.schedule_id.clone(),
                report_id: execution.report_id.clone(),
                tenant_id: execution.tenant_id.clone(),
                parameters: schedule.parameters.clone(),
                output_config: schedule.output_config.clone(),
                retry_attempt: execution.retry_attempt,
            };

            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(now);
            self.save_execution_logged(&execution);
            info!(
                execution_id = %execution.id,
                schedule_id = %execution.schedule_id,
                priority = execution.priority,
                retry_attempt = execution.retry_attempt,
                "execution started"
            );

            let execution_id = execution.id.clone();
            state.running.insert(execution_id.clone(), execution);
            let engine = Arc::clone(self);
            let task_id = execution_id.clone();
            let handle = tokio::spawn(async move { engine.run_execution(task_id, request).await });
            dispatched.push(Dispatched {
                execution_id,
                handle,
            });
        }
        dispatched
    }

    async fn run_execution(self: Arc<Self>, execution_id: String, request: ReportRequest) {
        let report_engine = Arc::clone(&self.report_engine);
        let started = Instant::now();
        // The inner task turns a panicking engine into a JoinError instead of
        // taking the completion step down with it.
        let outcome = match tokio::spawn(async move { report_engine.execute(request).await }).await {
            Ok(result) => result,
            Err(e) => Err(panic_failure(e)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.complete_execution(&execution_id, outcome, elapsed_ms, Utc::now())
            .await;
    }

    /// Record the result of a running execution and free its slot.
    async fn complete_execution(
        &self,
        execution_id: &str,
        outcome: std::result::Result<ReportOutput, ExecutionFailure>,
        elapsed_ms: u64,
        now: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().await;
        let Some(mut execution) = state.running.remove(execution_id) else {
            debug!(execution_id, "result discarded for cancelled execution");
            return;
        };
        execution.completed_at = Some(now);
        execution.execution_time_ms = Some(elapsed_ms);

        let history_limit = self.config.history_limit;
        if !state.schedules.contains_key(&execution.schedule_id) {
            execution.status = ExecutionStatus::Cancelled;
            state.record_finished(execution, history_limit);
            return;
        }
        let Some(schedule) = state.schedules.get_mut(&execution.schedule_id) else {
            return;
        };
        schedule.execution_count += 1;
        schedule.last_execution = execution.started_at;
        schedule.updated_at = now;

        let mut retry = None;
        match outcome {
            Ok(output) => {
                schedule.success_count += 1;
                execution.status = ExecutionStatus::Completed;
                execution.record_count = Some(output.record_count);
                execution.output_files = output.output_files;
                execution.resource_usage = output.resource_usage;
                info!(
                    execution_id,
                    schedule_id = %execution.schedule_id,
                    record_count = output.record_count,
                    elapsed_ms,
                    "execution completed"
                );
            }
            Err(failure) => {
                schedule.error_count += 1;
                warn!(
                    execution_id,
                    schedule_id = %execution.schedule_id,
                    code = %failure.code,
                    retry_attempt = execution.retry_attempt,
                    "execution failed: {}",
                    failure.message
                );
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(failure.into());
                retry = Some(decide(
                    schedule.schedule_config.retry_config.as_ref(),
                    execution.retry_attempt,
                    now,
                ));
            }
        }
        let schedule = schedule.clone();

        match retry {
            Some(RetryDecision::Retry { attempt, delay, due }) => {
                state.timers.arm_retry(
                    RetryTimer {
                        schedule_id: execution.schedule_id.clone(),
                        failed_execution_id: execution.id.clone(),
                        priority: execution.priority,
                        retry_attempt: attempt,
                    },
                    due,
                );
                self.timer_armed.notify_one();
                info!(
                    execution_id,
                    schedule_id = %execution.schedule_id,
                    attempt,
                    delay_secs = delay.num_seconds(),
                    "retry scheduled"
                );
            }
            Some(RetryDecision::Exhausted { max_retries }) => {
                warn!(
                    execution_id,
                    schedule_id = %execution.schedule_id,
                    max_retries,
                    "retries exhausted"
                );
            }
            Some(RetryDecision::NotConfigured) | None => {}
        }

        // Persist before the lock drops; a delete waiting on it must win.
        self.save_schedule_logged(&schedule);
        self.save_execution_logged(&execution);
        state.record_finished(execution, history_limit);
    }

    // --- off-peak ----------------------------------------------------------

    /// Inside the off-peak window, move executions of off-peak-only schedules
    /// ahead of the rest without breaking priority order within each group.
    /// Returns whether the queue was reordered.
    pub async fn reorder_off_peak(&self, now: DateTime<Utc>) -> bool {
        if !self.off_peak.contains(now) {
            return false;
        }
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.queue.is_empty() {
            return false;
        }
        let schedules = &state.schedules;
        state.queue.reorder_by(|e| {
            schedules
                .get(&e.schedule_id)
                .is_some_and(|s| s.schedule_config.off_peak_only)
        });
        debug!(pending = state.queue.len(), "queue reordered for off-peak");
        true
    }

    // --- observability -----------------------------------------------------

    pub async fn queue_status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            pending: state.queue.len(),
            running: state.running.len(),
            max_concurrent: self.config.max_concurrent_executions,
            timers_armed: state.timers.recurring_len(),
            retries_scheduled: state.timers.retry_len(),
            off_peak_active: self.off_peak.contains(Utc::now()),
        }
    }

    /// Look up a pending, running or finished execution. Records already
    /// evicted from the in-memory history are read from the repository.
    pub async fn get_execution(&self, execution_id: &str) -> Result<ScheduleExecution> {
        let state = self.state.lock().await;
        let found = state
            .queue
            .get(execution_id)
            .or_else(|| state.running.get(execution_id))
            .or_else(|| state.history.iter().rev().find(|e| e.id == execution_id))
            .cloned();
        if let Some(execution) = found {
            return Ok(execution);
        }
        let persisted = match &self.repository {
            Some(repo) => repo.load_execution(execution_id)?,
            None => None,
        };
        persisted
            .filter(|e| e.status.is_terminal() && state.schedules.contains_key(&e.schedule_id))
            .ok_or_else(|| SchedulerError::not_found(execution_id))
    }

    /// Pending, running and finished executions of a schedule, in that
    /// order. Finished ones come newest first; with a repository attached,
    /// up to `history_limit` more persisted records fill in what memory
    /// evicted.
    pub async fn list_executions(&self, schedule_id: &str) -> Vec<ScheduleExecution> {
        let state = self.state.lock().await;
        let mut running: Vec<&ScheduleExecution> = state
            .running
            .values()
            .filter(|e| e.schedule_id == schedule_id)
            .collect();
        running.sort_by_key(|e| e.started_at);

        let mut listed: Vec<ScheduleExecution> = state
            .queue
            .iter()
            .filter(|e| e.schedule_id == schedule_id)
            .chain(running)
            .chain(state.history.iter().rev().filter(|e| e.schedule_id == schedule_id))
            .cloned()
            .collect();

        if let Some(repo) = &self.repository {
            if !state.schedules.contains_key(schedule_id) {
                return listed;
            }
            let limit = listed.len() + self.config.history_limit;
            match repo.load_executions(schedule_id, limit) {
                Ok(persisted) => {
                    let seen: HashSet<String> = listed.iter().map(|e| e.id.clone()).collect();
                    listed.extend(
                        persisted
                            .into_iter()
                            .filter(|e| e.status.is_terminal() && !seen.contains(&e.id))
                            .take(self.config.history_limit),
                    );
                }
                Err(e) => warn!(schedule_id, code = e.code(), "failed to load execution history: {e}"),
            }
        }
        listed
    }

    // --- driver loop -------------------------------------------------------

    /// Main loop. Fires timers at their deadlines, promotes queued work on
    /// the queue tick and reorders on the off-peak tick until `shutdown`
    /// broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrent = self.config.max_concurrent_executions,
            queue_tick_ms = self.config.queue_tick_ms,
            off_peak_tick_secs = self.config.off_peak_tick_secs,
            "scheduler engine started"
        );
        let mut queue_tick =
            tokio::time::interval(std::time::Duration::from_millis(self.config.queue_tick_ms.max(1)));
        queue_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut off_peak_tick =
            tokio::time::interval(std::time::Duration::from_secs(self.config.off_peak_tick_secs.max(1)));
        off_peak_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wait = self.until_next_timer().await;
            tokio::select! {
                _ = queue_tick.tick() => {
                    self.process_queue(Utc::now()).await;
                }
                _ = off_peak_tick.tick() => {
                    self.reorder_off_peak(Utc::now()).await;
                }
                _ = tokio::time::sleep(wait) => {
                    if !self.fire_due_timers(Utc::now()).await.is_empty() {
                        self.process_queue(Utc::now()).await;
                    }
                }
                _ = self.timer_armed.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Drop every timer. Queued executions stay where they are; running ones
    /// finish on their own tasks.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let timers = state.timers.len();
        state.timers.clear_all();
        info!(
            timers,
            pending = state.queue.len(),
            running = state.running.len(),
            "scheduler timers cleared"
        );
    }

    async fn until_next_timer(&self) -> std::time::Duration {
        let state = self.state.lock().await;
        match state.timers.next_deadline() {
            Some(due) => (due - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
                .min(IDLE_TIMER_WAIT),
            None => IDLE_TIMER_WAIT,
        }
    }

    // --- persistence helpers -----------------------------------------------

    fn register_triggers(&self, schedule: &ReportSchedule) {
        if schedule.is_active && !schedule.schedule_type.is_timer_based() {
            self.registrar.register(schedule);
        }
    }

    fn save_schedule(&self, schedule: &ReportSchedule) -> Result<()> {
        match &self.repository {
            Some(repo) => repo.save_schedule(schedule),
            None => Ok(()),
        }
    }

    fn save_schedule_logged(&self, schedule: &ReportSchedule) {
        if let Err(e) = self.save_schedule(schedule) {
            error!(schedule_id = %schedule.id, code = e.code(), "failed to persist schedule: {e}");
        }
    }

    fn save_execution_logged(&self, execution: &ScheduleExecution) {
        if let Some(repo) = &self.repository {
            if let Err(e) = repo.save_execution(execution) {
                error!(execution_id = %execution.id, code = e.code(), "failed to persist execution: {e}");
            }
        }
    }
}

/// Next execution for an active schedule; inactive schedules have none.
fn next_for(schedule: &ReportSchedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if schedule.is_active {
        compute_next_execution(schedule, now)
    } else {
        None
    }
}

fn panic_failure(err: JoinError) -> ExecutionFailure {
    if !err.is_panic() {
        return ExecutionFailure::new("PANIC", err.to_string());
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "report engine panicked".to_string());
    ExecutionFailure::new("PANIC", message)
}
