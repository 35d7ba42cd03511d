//! Priority-ordered pending queue.
//!
//! Entries are ordered by priority (descending), then scheduled time
//! (ascending), then submission sequence, so equal-priority tasks dispatch
//! FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::task::{TaskId, TaskPriority};

#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub task_id: TaskId,
    pub priority: TaskPriority,
    pub scheduled_at: DateTime<Utc>,
    pub sequence: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier scheduled time,
        // then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.scheduled_at.cmp(&self.scheduled_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Heap of tasks waiting for an agent slot.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<QueueEntry>,
    next_sequence: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task_id: TaskId, priority: TaskPriority, scheduled_at: DateTime<Utc>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueEntry {
            task_id,
            priority,
            scheduled_at,
            sequence,
        });
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    /// Put an entry back without disturbing its original ordering.
    pub fn requeue(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    /// Drop the entry for a task, if present. Returns whether one was removed.
    pub fn remove(&mut self, task_id: &TaskId) -> bool {
        let before = self.heap.len();
        let entries: Vec<_> = std::mem::take(&mut self.heap)
            .into_iter()
            .filter(|e| &e.task_id != task_id)
            .collect();
        self.heap = entries.into();
        self.heap.len() < before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> TaskId {
        TaskId::generate()
    }

    #[test]
    fn test_priority_order() {
        let mut queue = PendingQueue::new();
        let now = Utc::now();

        let low = id();
        let critical = id();
        let normal = id();
        queue.push(low.clone(), TaskPriority::Low, now);
        queue.push(critical.clone(), TaskPriority::Critical, now);
        queue.push(normal.clone(), TaskPriority::Normal, now);

        assert_eq!(queue.pop().unwrap().task_id, critical);
        assert_eq!(queue.pop().unwrap().task_id, normal);
        assert_eq!(queue.pop().unwrap().task_id, low);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = PendingQueue::new();
        let now = Utc::now();

        let first = id();
        let second = id();
        let third = id();
        queue.push(first.clone(), TaskPriority::Normal, now);
        queue.push(second.clone(), TaskPriority::Normal, now);
        queue.push(third.clone(), TaskPriority::Normal, now);

        assert_eq!(queue.pop().unwrap().task_id, first);
        assert_eq!(queue.pop().unwrap().task_id, second);
        assert_eq!(queue.pop().unwrap().task_id, third);
    }

    #[test]
    fn test_earlier_schedule_wins_within_priority() {
        let mut queue = PendingQueue::new();
        let now = Utc::now();

        let later = id();
        let earlier = id();
        queue.push(later.clone(), TaskPriority::Normal, now + chrono::Duration::seconds(30));
        queue.push(earlier.clone(), TaskPriority::Normal, now);

        assert_eq!(queue.pop().unwrap().task_id, earlier);
        assert_eq!(queue.pop().unwrap().task_id, later);
    }

    #[test]
    fn test_remove() {
        let mut queue = PendingQueue::new();
        let now = Utc::now();

        let keep = id();
        let drop = id();
        queue.push(keep.clone(), TaskPriority::Normal, now);
        queue.push(drop.clone(), TaskPriority::High, now);

        assert!(queue.remove(&drop));
        assert!(!queue.remove(&drop));
        assert_eq!(queue.pop().unwrap().task_id, keep);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_requeue_preserves_position() {
        let mut queue = PendingQueue::new();
        let now = Utc::now();

        let first = id();
        let second = id();
        queue.push(first.clone(), TaskPriority::Normal, now);
        queue.push(second.clone(), TaskPriority::Normal, now);

        let entry = queue.pop().unwrap();
        assert_eq!(entry.task_id, first);
        queue.requeue(entry);

        assert_eq!(queue.pop().unwrap().task_id, first);
        assert_eq!(queue.pop().unwrap().task_id, second);
    }
}
