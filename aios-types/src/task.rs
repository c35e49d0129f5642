//! The `Task` record owned by the Priority Scheduler (spec §3, §4.F).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Scheduling priority. Smaller value = higher priority (`P0` runs before
/// `P3`), matching spec §4.F's `(priority_value, created_at)` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0 = 0,
    P1 = 1,
    P2 = 2,
    P3 = 3,
}

impl Priority {
    /// Numeric priority value used for queue ordering.
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.value())
    }
}

/// Terminal or in-flight state of a `Task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl TaskState {
    /// Terminal states never re-enter the queue (spec §3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

/// A unit of work owned exclusively by the Scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub name: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Name of the registered handler this task dispatches to.
    pub handler_ref: String,
    pub payload: Value,
    pub timeout_sec: u64,
    pub max_retries: u32,
    pub retries: u32,
    pub state: TaskState,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Task {
    /// Build a freshly-queued task.
    pub fn new(
        name: impl Into<String>,
        priority: Priority,
        handler_ref: impl Into<String>,
        payload: Value,
        timeout_sec: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            priority,
            created_at: Utc::now(),
            handler_ref: handler_ref.into(),
            payload,
            timeout_sec,
            max_retries,
            retries: 0,
            state: TaskState::Queued,
            result: None,
            error: None,
        }
    }

    /// Ordering key for the priority queue: smaller priority value first,
    /// FIFO (`created_at`) within a priority class.
    pub fn order_key(&self) -> (u8, DateTime<Utc>) {
        (self.priority.value(), self.created_at)
    }
}
