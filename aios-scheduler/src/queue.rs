//! Priority queue ordering for the Scheduler (spec §4.F): smaller
//! `priority_value` first, FIFO within a priority class.

use aios_types::Task;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct QueuedTask(Task);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.order_key() == other.0.order_key()
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so smaller priority_value and
        // earlier created_at sort to the top.
        let (p1, t1) = self.0.order_key();
        let (p2, t2) = other.0.order_key();
        p2.cmp(&p1).then_with(|| t2.cmp(&t1))
    }
}

/// A priority queue over `Task`s. `pop` is O(log n) and always returns the
/// lowest `priority_value`, earliest-`created_at` task.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn push(&mut self, task: Task) {
        self.heap.push(QueuedTask(task));
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|q| q.0)
    }

    pub fn peek(&self) -> Option<&Task> {
        self.heap.peek().map(|q| &q.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aios_types::Priority;
    use serde_json::json;
    use std::thread::sleep;
    use std::time::Duration as StdDuration;

    fn task(priority: Priority) -> Task {
        sleep(StdDuration::from_millis(1));
        Task::new("t", priority, "handler", json!({}), 5, 0)
    }

    #[test]
    fn pops_highest_priority_first() {
        let mut q = TaskQueue::new();
        q.push(task(Priority::P2));
        q.push(task(Priority::P0));
        q.push(task(Priority::P1));
        assert_eq!(q.pop().unwrap().priority, Priority::P0);
        assert_eq!(q.pop().unwrap().priority, Priority::P1);
        assert_eq!(q.pop().unwrap().priority, Priority::P2);
    }

    #[test]
    fn fifo_within_same_priority_class() {
        let mut q = TaskQueue::new();
        let first = task(Priority::P1);
        let first_id = first.task_id;
        q.push(first);
        let second = task(Priority::P1);
        let second_id = second.task_id;
        q.push(second);
        assert_eq!(q.pop().unwrap().task_id, first_id);
        assert_eq!(q.pop().unwrap().task_id, second_id);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = TaskQueue::new();
        q.push(task(Priority::P0));
        assert!(q.peek().is_some());
        assert_eq!(q.len(), 1);
    }
}
