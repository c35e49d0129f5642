//! The `Action` record owned by the Action Queue (spec §3, §4.E).

use crate::canonical::stable_hash;
use crate::task::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Risk classification driving the approval-gate guardrail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl Risk {
    /// Derive risk from priority when no explicit `risk` is set (spec §4.E):
    /// HIGH priority -> HIGH risk, LOW priority -> LOW risk, else MEDIUM.
    pub fn from_priority(priority: Priority) -> Self {
        match priority {
            Priority::P0 => Self::High,
            Priority::P3 => Self::Low,
            Priority::P1 | Priority::P2 => Self::Medium,
        }
    }
}

/// Terminal or in-flight state of an `Action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// A guarded, idempotent remediation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_id: Uuid,
    pub action_type: String,
    pub target: String,
    pub params: Value,
    pub risk: Risk,
    pub priority: Priority,
    pub idempotency_key: String,
    pub status: ActionStatus,
    pub attempts: u32,
    pub skip_reason: Option<String>,
    pub result: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    /// Set by the approval-gate guardrail's external confirmation path.
    pub approved: bool,
    /// Optional short-circuit hint consulted by the Preflight check
    /// (spec §4.E): if set and the named process is already running, the
    /// action finalizes as `NOOP_ALREADY_RUNNING` without executing.
    pub process_name: Option<String>,
}

impl Action {
    /// Build a new, queued action. `risk` is resolved from an explicit
    /// override or derived from `priority` per spec §4.E.
    pub fn new(
        action_type: impl Into<String>,
        target: impl Into<String>,
        params: Value,
        priority: Priority,
        explicit_risk: Option<Risk>,
    ) -> Self {
        let action_type = action_type.into();
        let target = target.into();
        let idempotency_key = stable_hash(&action_type, &target, &params);
        Self {
            action_id: Uuid::new_v4(),
            risk: explicit_risk.unwrap_or_else(|| Risk::from_priority(priority)),
            action_type,
            target,
            params,
            priority,
            idempotency_key,
            status: ActionStatus::Queued,
            attempts: 0,
            skip_reason: None,
            result: None,
            enqueued_at: Utc::now(),
            finalized_at: None,
            approved: false,
            process_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn risk_derived_from_priority_when_unset() {
        let a = Action::new("shell", "host1", json!({}), Priority::P0, None);
        assert_eq!(a.risk, Risk::High);
        let b = Action::new("shell", "host1", json!({}), Priority::P3, None);
        assert_eq!(b.risk, Risk::Low);
        let c = Action::new("shell", "host1", json!({}), Priority::P1, None);
        assert_eq!(c.risk, Risk::Medium);
    }

    #[test]
    fn explicit_risk_wins_over_priority() {
        let a = Action::new("shell", "host1", json!({}), Priority::P3, Some(Risk::High));
        assert_eq!(a.risk, Risk::High);
    }

    #[test]
    fn equivalent_actions_share_idempotency_key() {
        let a = Action::new("shell", "host1", json!({"cmd": "x", "n": 1}), Priority::P1, None);
        let b = Action::new("shell", "host1", json!({"n": 1, "cmd": "x"}), Priority::P2, None);
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }
}
