//! Priority-ordered pending execution queue.

use std::cmp::Reverse;
use std::collections::VecDeque;

use crate::types::ScheduleExecution;

/// Pending executions, highest priority first, FIFO within a priority.
///
/// The internal order is authoritative; `queue_position` on each execution is
/// refreshed after every mutation for observability only.
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    items: VecDeque<ScheduleExecution>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert behind every queued execution of equal or higher priority.
    /// Returns the 1-based position the execution landed at.
    pub fn enqueue(&mut self, execution: ScheduleExecution) -> usize {
        let idx = self
            .items
            .iter()
            .position(|queued| queued.priority < execution.priority)
            .unwrap_or(self.items.len());
        self.items.insert(idx, execution);
        self.refresh_positions();
        idx + 1
    }

    /// Remove and return the head of the queue.
    pub fn dequeue(&mut self) -> Option<ScheduleExecution> {
        let head = self.items.pop_front();
        if head.is_some() {
            self.refresh_positions();
        }
        head.map(|mut e| {
            e.queue_position = None;
            e
        })
    }

    /// Remove every pending execution belonging to `schedule_id`.
    pub fn remove_for_schedule(&mut self, schedule_id: &str) -> Vec<ScheduleExecution> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|e| e.schedule_id == schedule_id);
        self.items = kept.into();
        self.refresh_positions();
        removed
    }

    /// Stable re-sort by `(eligible desc, priority desc)`.
    ///
    /// Items with equal eligibility and priority keep their relative order.
    pub fn reorder_by<F>(&mut self, eligible: F)
    where
        F: Fn(&ScheduleExecution) -> bool,
    {
        self.items
            .make_contiguous()
            .sort_by_key(|e| (Reverse(eligible(e)), Reverse(e.priority)));
        self.refresh_positions();
    }

    pub fn contains_schedule(&self, schedule_id: &str) -> bool {
        self.items.iter().any(|e| e.schedule_id == schedule_id)
    }

    pub fn get(&self, execution_id: &str) -> Option<&ScheduleExecution> {
        self.items.iter().find(|e| e.id == execution_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduleExecution> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn refresh_positions(&mut self) {
        for (i, e) in self.items.iter_mut().enumerate() {
            e.queue_position = Some(i + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionTrigger, NewSchedule, ReportSchedule};
    use chrono::Utc;

    fn exec(schedule: &ReportSchedule, priority: u8) -> ScheduleExecution {
        ScheduleExecution::new(schedule, priority, ExecutionTrigger::Manual, 0, Utc::now())
    }

    fn schedule(id: &str) -> ReportSchedule {
        let mut s = ReportSchedule::from_definition(NewSchedule::interval("r", "t", 5), Utc::now());
        s.id = id.to_string();
        s
    }

    #[test]
    fn dequeues_by_priority_then_fifo() {
        let s = schedule("s");
        let mut queue = ExecutionQueue::new();
        let priorities = [2, 4, 2, 3, 1, 4];
        let ids: Vec<String> = priorities
            .iter()
            .map(|p| {
                let e = exec(&s, *p);
                let id = e.id.clone();
                queue.enqueue(e);
                id
            })
            .collect();

        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue()).map(|e| e.id).collect();
        assert_eq!(
            order,
            vec![
                ids[1].clone(),
                ids[5].clone(),
                ids[3].clone(),
                ids[0].clone(),
                ids[2].clone(),
                ids[4].clone(),
            ]
        );
    }

    #[test]
    fn positions_track_queue_order() {
        let s = schedule("s");
        let mut queue = ExecutionQueue::new();
        assert_eq!(queue.enqueue(exec(&s, 2)), 1);
        assert_eq!(queue.enqueue(exec(&s, 4)), 1);
        assert_eq!(queue.enqueue(exec(&s, 2)), 3);
        let positions: Vec<_> = queue.iter().map(|e| e.queue_position).collect();
        assert_eq!(positions, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(queue.dequeue().unwrap().queue_position, None);
    }

    #[test]
    fn removes_only_the_given_schedule() {
        let (a, b) = (schedule("a"), schedule("b"));
        let mut queue = ExecutionQueue::new();
        queue.enqueue(exec(&a, 2));
        queue.enqueue(exec(&b, 3));
        queue.enqueue(exec(&a, 4));
        let removed = queue.remove_for_schedule("a");
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);
        assert!(!queue.contains_schedule("a"));
        assert_eq!(queue.iter().next().unwrap().queue_position, Some(1));
    }

    #[test]
    fn reorder_is_stable_within_equal_keys() {
        let (peak, off) = (schedule("peak"), schedule("off"));
        let mut queue = ExecutionQueue::new();
        let p_high = exec(&peak, 3);
        let p_norm1 = exec(&peak, 2);
        let o_norm1 = exec(&off, 2);
        let p_norm2 = exec(&peak, 2);
        let o_norm2 = exec(&off, 2);
        let o_low = exec(&off, 1);
        let expected = vec![
            o_norm1.id.clone(),
            o_norm2.id.clone(),
            o_low.id.clone(),
            p_high.id.clone(),
            p_norm1.id.clone(),
            p_norm2.id.clone(),
        ];
        for e in [p_high, p_norm1, o_norm1, p_norm2, o_norm2, o_low] {
            queue.enqueue(e);
        }

        queue.reorder_by(|e| e.schedule_id == "off");
        let order: Vec<_> = queue.iter().map(|e| e.id.clone()).collect();
        assert_eq!(order, expected);
    }
}
