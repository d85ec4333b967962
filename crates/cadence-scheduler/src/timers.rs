//! Single ordered timer queue shared by recurring schedule timers and
//! one-shot retry timers.
//!
//! Entries are keyed by `(due, seq)` so iteration order is fire order and
//! same-instant entries fire in arming order. One driver loop sleeps until
//! [`TimerQueue::next_deadline`] and drains [`TimerQueue::pop_due`].
//! Cancelling is a map removal; there are no native timer handles to leak.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

/// A retry waiting for its backoff delay to elapse.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTimer {
    pub schedule_id: String,
    /// The failed execution this retry descends from.
    pub failed_execution_id: String,
    pub priority: u8,
    /// Attempt number the new execution will carry.
    pub retry_attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerKind {
    /// The per-schedule recurring timer (cron / interval).
    Recurring { schedule_id: String },
    /// A one-shot retry.
    Retry(RetryTimer),
}

impl TimerKind {
    pub fn schedule_id(&self) -> &str {
        match self {
            TimerKind::Recurring { schedule_id } => schedule_id,
            TimerKind::Retry(r) => &r.schedule_id,
        }
    }
}

/// An entry removed from the queue because it came due.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTimer {
    pub due: DateTime<Utc>,
    pub kind: TimerKind,
}

type TimerKey = (DateTime<Utc>, u64);

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<TimerKey, TimerKind>,
    /// At most one recurring entry per schedule.
    recurring: HashMap<String, TimerKey>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the recurring timer for `schedule_id`.
    ///
    /// Refuses to arm when `at <= now`: a stale time must be recomputed by the
    /// caller first, otherwise every tick would fire it again. Any previously
    /// armed recurring timer for the schedule is replaced.
    pub fn arm_recurring(&mut self, schedule_id: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.clear(schedule_id);
        if at <= now {
            debug!(schedule_id, due = %at, "stale timer not armed");
            return false;
        }
        let key = self.key(at);
        self.entries.insert(
            key,
            TimerKind::Recurring {
                schedule_id: schedule_id.to_string(),
            },
        );
        self.recurring.insert(schedule_id.to_string(), key);
        true
    }

    /// Arm a one-shot retry timer. A due time in the past fires on the next
    /// drain.
    pub fn arm_retry(&mut self, retry: RetryTimer, at: DateTime<Utc>) {
        let key = self.key(at);
        self.entries.insert(key, TimerKind::Retry(retry));
    }

    /// Remove the recurring timer for `schedule_id`. Clearing an absent timer
    /// is a no-op. Returns whether anything was removed.
    pub fn clear(&mut self, schedule_id: &str) -> bool {
        match self.recurring.remove(schedule_id) {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Remove every pending retry timer belonging to `schedule_id`.
    pub fn clear_retries(&mut self, schedule_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, kind| {
            !matches!(kind, TimerKind::Retry(r) if r.schedule_id == schedule_id)
        });
        before - self.entries.len()
    }

    /// Drop every entry. Used on shutdown.
    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.recurring.clear();
    }

    /// Remove and return every entry due at or before `now`, in fire order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<FiredTimer> {
        let mut fired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let (key, kind) = entry.remove_entry();
            if let TimerKind::Recurring { schedule_id } = &kind {
                if self.recurring.get(schedule_id) == Some(&key) {
                    self.recurring.remove(schedule_id);
                }
            }
            fired.push(FiredTimer { due: key.0, kind });
        }
        fired
    }

    /// Earliest due time, if any entry is armed.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    /// Number of schedules holding a recurring timer.
    pub fn recurring_len(&self) -> usize {
        self.recurring.len()
    }

    /// Number of one-shot retry timers waiting across all schedules.
    pub fn retry_len(&self) -> usize {
        self.entries.len() - self.recurring.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(&mut self, at: DateTime<Utc>) -> TimerKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        (at, seq)
    }
}
