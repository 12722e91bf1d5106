//! Priority task queue.
//!
//! Strict priority between levels, FIFO within a level. Task ids are
//! handed out in submission order, so the id doubles as the FIFO key.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::Serialize;
use tokio::time::Instant;

use pulse_core::{Priority, TaskId};

/// A unit of queued work. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub enqueued_at: Instant,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then the lower (older) id.
        (self.priority, Reverse(self.id)).cmp(&(other.priority, Reverse(other.id)))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Queued task count per priority level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueDepth {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }

    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    fn slot(&mut self, priority: Priority) -> &mut usize {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Task>,
    depth: QueueDepth,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        *self.depth.slot(task.priority) += 1;
        self.heap.push(task);
    }

    /// Remove the highest-priority, oldest task.
    pub fn pop(&mut self) -> Option<Task> {
        let task = self.heap.pop()?;
        *self.depth.slot(task.priority) -= 1;
        Some(task)
    }

    pub fn peek(&self) -> Option<&Task> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn depth(&self) -> QueueDepth {
        self.depth
    }

    /// True when any high or critical task is waiting.
    pub fn has_urgent(&self) -> bool {
        self.peek().is_some_and(|t| t.priority.is_urgent())
    }

    /// Remove every task below `floor`, returning them.
    pub fn shed_below(&mut self, floor: Priority) -> Vec<Task> {
        if self.heap.iter().all(|t| t.priority >= floor) {
            return Vec::new();
        }
        let (kept, shed): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .partition(|t| t.priority >= floor);
        for task in &shed {
            *self.depth.slot(task.priority) -= 1;
        }
        self.heap = BinaryHeap::from(kept);
        shed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: u64, priority: Priority) -> Task {
        Task {
            id: TaskId(id),
            priority,
            payload: json!({ "n": id }),
            enqueued_at: Instant::now(),
        }
    }

    fn drain(queue: &mut TaskQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.pop()).map(|t| t.id.0).collect()
    }

    #[test]
    fn pops_by_priority() {
        let mut q = TaskQueue::new();
        q.push(task(1, Priority::Low));
        q.push(task(2, Priority::High));
        q.push(task(3, Priority::Critical));
        q.push(task(4, Priority::Medium));

        assert_eq!(drain(&mut q), vec![3, 2, 4, 1]);
        assert!(q.is_empty());
        assert_eq!(q.depth(), QueueDepth::default());
    }

    #[test]
    fn fifo_within_priority() {
        let mut q = TaskQueue::new();
        for id in 1..=5 {
            q.push(task(id, Priority::Medium));
        }
        q.push(task(6, Priority::High));
        assert_eq!(drain(&mut q), vec![6, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn depth_tracks_push_and_pop() {
        let mut q = TaskQueue::new();
        q.push(task(1, Priority::Low));
        q.push(task(2, Priority::Low));
        q.push(task(3, Priority::Critical));

        let depth = q.depth();
        assert_eq!(depth.low, 2);
        assert_eq!(depth.critical, 1);
        assert_eq!(depth.total(), 3);
        assert!(q.has_urgent());

        q.pop();
        assert_eq!(q.depth().get(Priority::Critical), 0);
        assert!(!q.has_urgent());
    }

    #[test]
    fn shed_keeps_high_and_critical() {
        let mut q = TaskQueue::new();
        q.push(task(1, Priority::Low));
        q.push(task(2, Priority::High));
        q.push(task(3, Priority::Medium));
        q.push(task(4, Priority::Critical));
        q.push(task(5, Priority::High));

        let shed = q.shed_below(Priority::High);
        let mut shed_ids: Vec<u64> = shed.iter().map(|t| t.id.0).collect();
        shed_ids.sort();
        assert_eq!(shed_ids, vec![1, 3]);

        assert_eq!(q.depth().total(), 3);
        assert_eq!(drain(&mut q), vec![4, 2, 5]);
    }

    #[test]
    fn shed_with_nothing_below_floor() {
        let mut q = TaskQueue::new();
        q.push(task(1, Priority::Critical));
        assert!(q.shed_below(Priority::High).is_empty());
        assert_eq!(q.len(), 1);
    }
}
