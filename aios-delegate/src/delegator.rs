//! Delegator (spec §4.H): capability-matched subtask assignment over a
//! dependency DAG, with result aggregation once every subtask is terminal.

use aios_bus::EventBus;
use aios_types::{Delegation, DelegationStatus, Event, Severity, Subtask, SubtaskStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Registry of agents and the capabilities they advertise.
pub struct Delegator {
    bus: Arc<EventBus>,
    registry: DashMap<String, Vec<String>>,
    delegations: DashMap<Uuid, Mutex<Delegation>>,
}

impl Delegator {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { bus, registry: DashMap::new(), delegations: DashMap::new() })
    }

    pub fn register_agent(&self, agent: impl Into<String>, caps: Vec<String>) {
        self.registry.insert(agent.into(), caps);
    }

    /// Pick the first registered agent whose capability set is a superset
    /// of `required` (spec §4.H: "selected by capability match").
    fn select_agent(&self, required: &[String]) -> Option<String> {
        self.registry.iter().find(|e| required.iter().all(|c| e.value().contains(c))).map(|e| e.key().clone())
    }

    /// Register a new delegation and assign whatever is immediately ready.
    #[instrument(skip(self, delegation), fields(goal = %delegation.goal))]
    pub fn start(&self, mut delegation: Delegation) -> Uuid {
        let id = delegation.delegation_id;
        delegation.status = DelegationStatus::InProgress;
        self.emit(id, "delegation.started", Severity::Info, json!({"goal": delegation.goal}));
        self.delegations.insert(id, Mutex::new(delegation));
        self.assign_ready_tasks(id);
        id
    }

    /// Assign every currently-runnable subtask to a capable agent. Subtasks
    /// with no capable agent are left `Pending` (spec is silent on a
    /// deadline; the caller may retry once capacity appears).
    pub fn assign_ready_tasks(&self, delegation_id: Uuid) -> Vec<String> {
        let Some(entry) = self.delegations.get(&delegation_id) else { return Vec::new() };
        let mut delegation = entry.lock();
        let ready_ids: Vec<String> = delegation.ready_subtasks().iter().map(|s| s.id.clone()).collect();

        let mut assigned = Vec::new();
        for subtask_id in ready_ids {
            let caps = delegation.subtasks.iter().find(|s| s.id == subtask_id).map(|s| s.caps.clone()).unwrap_or_default();
            let Some(agent) = self.select_agent(&caps) else { continue };
            if let Some(subtask) = delegation.subtasks.iter_mut().find(|s| s.id == subtask_id) {
                subtask.status = SubtaskStatus::Assigned;
                subtask.assigned_to = Some(agent.clone());
            }
            assigned.push(subtask_id.clone());
            drop(delegation);
            self.emit(delegation_id, "delegation.subtask_assigned", Severity::Info, json!({"subtask_id": subtask_id, "agent": agent}));
            delegation = entry.lock();
        }
        assigned
    }

    /// Record a subtask's terminal outcome, then assign whatever it
    /// unblocked, finalizing the delegation once nothing remains.
    pub fn complete_subtask(&self, delegation_id: Uuid, subtask_id: &str, result: std::result::Result<Value, String>) {
        let Some(entry) = self.delegations.get(&delegation_id) else { return };
        let all_terminal = {
            let mut delegation = entry.lock();
            let Some(subtask) = delegation.subtasks.iter_mut().find(|s| s.id == subtask_id) else { return };
            match &result {
                Ok(value) => {
                    subtask.status = SubtaskStatus::Succeeded;
                    subtask.result = Some(value.clone());
                }
                Err(_) => {
                    subtask.status = SubtaskStatus::Failed;
                }
            }
            delegation.all_terminal()
        };

        let event_type = if result.is_ok() { "delegation.subtask_completed" } else { "delegation.subtask_failed" };
        self.emit(delegation_id, event_type, if result.is_ok() { Severity::Info } else { Severity::Warn }, json!({"subtask_id": subtask_id}));

        if all_terminal {
            self.finalize(delegation_id);
        } else {
            self.assign_ready_tasks(delegation_id);
        }
    }

    fn finalize(&self, delegation_id: Uuid) {
        let Some(entry) = self.delegations.get(&delegation_id) else { return };
        let mut delegation = entry.lock();

        let failed_count = delegation.subtasks.iter().filter(|s| s.status == SubtaskStatus::Failed).count();
        delegation.status = if failed_count == 0 {
            DelegationStatus::Completed
        } else if failed_count <= delegation.max_failures {
            DelegationStatus::Degraded
        } else {
            DelegationStatus::Failed
        };
        delegation.aggregated_result = Some(delegation.subtasks.iter().map(|s| s.result.clone().unwrap_or(Value::Null)).collect());

        let status = delegation.status;
        let event_type = match status {
            DelegationStatus::Completed => "delegation.completed",
            DelegationStatus::Degraded => "delegation.degraded",
            _ => "delegation.failed",
        };
        let severity = match status {
            DelegationStatus::Completed => Severity::Info,
            DelegationStatus::Degraded => Severity::Warn,
            _ => Severity::Err,
        };
        drop(delegation);
        self.emit(delegation_id, event_type, severity, json!({"failed_count": failed_count}));
    }

    pub fn status(&self, delegation_id: Uuid) -> Option<Delegation> {
        self.delegations.get(&delegation_id).map(|d| d.lock().clone())
    }

    fn emit(&self, delegation_id: Uuid, event_type: &str, severity: Severity, mut payload: Value) {
        if let Value::Object(map) = &mut payload {
            map.insert("delegation_id".to_string(), json!(delegation_id));
        }
        let _ = self.bus.emit(Event::new(event_type, "aios-delegate", severity, "delegator", payload));
    }
}
