//! The `Delegation` record for the optional Delegator extension (spec §3, §4.H).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Terminal or in-flight state of a `Subtask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtaskStatus {
    Pending,
    Assigned,
    Running,
    Succeeded,
    Failed,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One node of a delegation's dependency DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    /// Capability names an agent must offer to be assignable.
    pub caps: Vec<String>,
    pub priority: u8,
    pub depends_on: Vec<String>,
    pub assigned_to: Option<String>,
    pub status: SubtaskStatus,
    pub result: Option<Value>,
}

/// Overall outcome of a delegation once every subtask is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationStatus {
    Pending,
    InProgress,
    Completed,
    Degraded,
    Failed,
}

/// A goal decomposed into a DAG of capability-matched subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub delegation_id: Uuid,
    pub goal: String,
    pub subtasks: Vec<Subtask>,
    pub aggregated_result: Option<Vec<Value>>,
    pub status: DelegationStatus,
    /// Tolerance: at most this many required subtasks may fail before the
    /// delegation is `Failed` rather than `Degraded`.
    pub max_failures: usize,
}

impl Delegation {
    pub fn new(goal: impl Into<String>, subtasks: Vec<Subtask>, max_failures: usize) -> Self {
        Self {
            delegation_id: Uuid::new_v4(),
            goal: goal.into(),
            subtasks,
            aggregated_result: None,
            status: DelegationStatus::Pending,
            max_failures,
        }
    }

    /// The frontier of subtasks whose dependencies are all terminal and
    /// which are not themselves already terminal or assigned - the
    /// currently runnable set (spec §4.H `assign_ready_tasks`).
    pub fn ready_subtasks(&self) -> Vec<&Subtask> {
        let terminal: std::collections::HashSet<&str> = self
            .subtasks
            .iter()
            .filter(|s| s.status.is_terminal())
            .map(|s| s.id.as_str())
            .collect();

        self.subtasks
            .iter()
            .filter(|s| matches!(s.status, SubtaskStatus::Pending))
            .filter(|s| s.depends_on.iter().all(|d| terminal.contains(d.as_str())))
            .collect()
    }

    /// Whether every subtask has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.subtasks.iter().all(|s| s.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(id: &str, deps: &[&str], status: SubtaskStatus) -> Subtask {
        Subtask {
            id: id.to_string(),
            description: String::new(),
            caps: vec![],
            priority: 0,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            assigned_to: None,
            status,
            result: None,
        }
    }

    #[test]
    fn ready_subtasks_respects_dag() {
        let d = Delegation::new(
            "goal",
            vec![
                subtask("a", &[], SubtaskStatus::Succeeded),
                subtask("b", &["a"], SubtaskStatus::Pending),
                subtask("c", &["b"], SubtaskStatus::Pending),
            ],
            0,
        );
        let ready: Vec<&str> = d.ready_subtasks().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["b"]);
    }
}
