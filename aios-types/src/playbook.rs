//! The `Playbook` record matched and executed by the Reactor (spec §3, §4.G).

use crate::action::Risk;
use crate::event::Severity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What to run if the matched actions need independent confirmation that
/// the remediation actually worked.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VerifySpec {
    /// Shell command; exit code 0 is success.
    pub command: Option<String>,
    /// Alternatively, recursively invoke another playbook to verify.
    pub playbook_id: Option<String>,
}

/// The match predicate a playbook is indexed and evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Trigger {
    /// Dotted event-type pattern (`resource.*`, `agent.error`, ...).
    pub event_pattern: String,
    /// If set, the event's severity must be one of these.
    pub severity_list: Option<Vec<Severity>>,
    /// If set, the event payload's `rule_id` must equal this.
    pub rule_id: Option<String>,
    /// If set, every one of these substrings must appear in the event
    /// message.
    pub message_contains: Option<Vec<String>>,
    /// If set, a running hit-count for this trigger must reach this value.
    pub min_hit_count: Option<u32>,
}

/// How a matched playbook's actions are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Return the would-be action list without side effects.
    DryRun,
    /// Execute immediately when risk and `require_confirm` allow it.
    Auto,
    /// Emit `reactor.pending_confirm` and wait for an approval event.
    Confirm,
}

/// A single action template a playbook enqueues on match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub action_type: String,
    pub target: String,
    pub params: Value,
}

/// A declarative remediation rule: trigger, actions, and guardrails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub trigger: Trigger,
    pub actions: Vec<ActionTemplate>,
    pub cooldown_sec: u64,
    pub require_confirm: bool,
    pub risk: Risk,
    pub verify: Option<VerifySpec>,
}

impl Playbook {
    /// Whether `event_type` satisfies this playbook's `event_pattern`
    /// (exact match, or a single `*` wildcard segment, or `**`/a bare `*`
    /// matching any remainder - same grammar as the Event Bus's
    /// subscription patterns).
    pub fn pattern_matches(&self, event_type: &str) -> bool {
        crate::pattern::matches(&self.trigger.event_pattern, event_type)
    }
}
