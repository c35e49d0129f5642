//! Action Queue (spec §4.E): idempotent enqueue, risk classification,
//! ordered guardrails, and execution delegated to the Scheduler as an
//! ordinary `Task` (per the design note that the queue keeps no worker pool
//! of its own).

use crate::breaker::CircuitBreaker;
use crate::budget::{BudgetConfig, ResourceBudget};
use crate::executor::Executor;
use crate::quota::{QuotaConfig, QuotaWindow};
use crate::receipt::{Receipt, ReceiptStore};
use crate::scheduler::Scheduler;
use aios_bus::EventBus;
use aios_types::{Action, ActionStatus, Event, FailureKind, Priority, Risk, Severity, Task};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Consulted by the Preflight short-circuit (spec §4.E). The host
/// application wires this to whatever process-table it has; with none
/// configured, Preflight never fires.
pub trait ProcessChecker: Send + Sync {
    fn is_running(&self, process_name: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct ActionQueueConfig {
    pub cooldown_sec: i64,
    pub quota: QuotaConfig,
    pub execution_timeout_sec: u64,
    pub execution_max_retries: u32,
    pub budget: BudgetConfig,
}

impl Default for ActionQueueConfig {
    fn default() -> Self {
        Self {
            cooldown_sec: 300,
            quota: QuotaConfig::default(),
            execution_timeout_sec: 30,
            execution_max_retries: 2,
            budget: BudgetConfig::default(),
        }
    }
}

pub struct ActionQueue {
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    breaker: Arc<CircuitBreaker>,
    executors: DashMap<String, Arc<dyn Executor>>,
    /// Keyed by idempotency_key - the source of truth for dedup.
    records: DashMap<String, SyncMutex<Action>>,
    /// `action_id -> idempotency_key`, for status lookups by the public id.
    by_action_id: DashMap<Uuid, String>,
    /// `task_id -> idempotency_key`, to correlate scheduler lifecycle events
    /// back to the action that spawned them.
    by_task_id: DashMap<Uuid, String>,
    last_success: DashMap<String, DateTime<Utc>>,
    quotas: DashMap<String, SyncMutex<QuotaWindow>>,
    config: ActionQueueConfig,
    budget_pressure: Arc<AtomicBool>,
    resource_budget: Arc<ResourceBudget>,
    process_checker: SyncMutex<Option<Arc<dyn ProcessChecker>>>,
    receipts: SyncMutex<Option<Arc<ReceiptStore>>>,
}

impl ActionQueue {
    pub fn new(
        bus: Arc<EventBus>,
        scheduler: Arc<Scheduler>,
        breaker: Arc<CircuitBreaker>,
        config: ActionQueueConfig,
    ) -> Arc<Self> {
        let resource_budget = Arc::new(ResourceBudget::new(config.budget));
        Arc::new(Self {
            bus,
            scheduler,
            breaker,
            executors: DashMap::new(),
            records: DashMap::new(),
            by_action_id: DashMap::new(),
            by_task_id: DashMap::new(),
            last_success: DashMap::new(),
            quotas: DashMap::new(),
            config,
            budget_pressure: Arc::new(AtomicBool::new(false)),
            resource_budget,
            process_checker: SyncMutex::new(None),
            receipts: SyncMutex::new(None),
        })
    }

    pub fn with_process_checker(self: Arc<Self>, checker: Arc<dyn ProcessChecker>) -> Arc<Self> {
        *self.process_checker.lock() = Some(checker);
        self
    }

    pub fn with_receipt_store(self: Arc<Self>, store: Arc<ReceiptStore>) -> Arc<Self> {
        *self.receipts.lock() = Some(store);
        self
    }

    pub fn set_budget_pressure(&self, pressured: bool) {
        self.budget_pressure.store(pressured, Ordering::SeqCst);
    }

    pub fn resource_budget(&self) -> &Arc<ResourceBudget> {
        &self.resource_budget
    }

    fn record_receipt(&self, action: &Action) {
        let Some(receipt) = Receipt::from_action(action) else { return };
        if let Some(store) = self.receipts.lock().as_ref() {
            if let Err(e) = store.append(&receipt) {
                warn!(error = %e, "failed to append action receipt");
            }
        }
    }

    /// Register an executor for `action_type` and wire it into the
    /// Scheduler's handler registry under the same name.
    pub fn register_executor(&self, action_type: impl Into<String>, executor: Arc<dyn Executor>) {
        let action_type = action_type.into();
        self.executors.insert(action_type.clone(), Arc::clone(&executor));
        let exec = Arc::clone(&executor);
        self.scheduler.register_handler(
            action_type,
            Arc::new(move |payload: Value| {
                let exec = Arc::clone(&exec);
                Box::pin(async move { exec.execute(&payload).await.into_handler_result() })
            }),
        );
    }

    /// Deduplicate by idempotency key, classify risk, run the ordered
    /// guardrails, and (if none reject) delegate execution to the Scheduler.
    #[instrument(skip(self, action), fields(action_type = %action.action_type, target = %action.target))]
    pub async fn enqueue(&self, mut action: Action) -> Action {
        if let Some(existing) = self.records.get(&action.idempotency_key) {
            let snapshot = existing.lock().clone();
            if !snapshot.status.is_terminal() {
                return snapshot;
            }
        }

        if let Some(reason) = self.check_guardrails(&action) {
            return self.finalize_skipped(action, reason);
        }

        if let Some(process_name) = action.process_name.clone() {
            if self.process_checker.lock().as_ref().is_some_and(|c| c.is_running(&process_name)) {
                return self.finalize_skipped(action, "noop_already_running".to_string());
            }
        }

        if !self.executors.contains_key(&action.action_type) {
            return self.finalize_skipped(action, "no_executor_registered".to_string());
        }

        action.status = ActionStatus::Running;
        action.attempts = 1;
        self.emit(&action, "action.enqueued", Severity::Info, json!({}));

        let task = Task::new(
            action.action_type.clone(),
            action.priority,
            action.action_type.clone(),
            action.params.clone(),
            self.config.execution_timeout_sec,
            self.config.execution_max_retries,
        );
        self.by_task_id.insert(task.task_id, action.idempotency_key.clone());
        self.by_action_id.insert(action.action_id, action.idempotency_key.clone());
        self.records.insert(action.idempotency_key.clone(), SyncMutex::new(action.clone()));

        if let Err(e) = self.scheduler.submit(task).await {
            warn!(error = %e, "failed to submit action to scheduler");
        }

        action
    }

    pub fn status(&self, action_id: Uuid) -> Option<Action> {
        let key = self.by_action_id.get(&action_id)?;
        self.records.get(key.value()).map(|r| r.lock().clone())
    }

    fn check_guardrails(&self, action: &Action) -> Option<String> {
        if action.risk == Risk::High && !action.approved {
            return Some("needs_approval".to_string());
        }

        let quota_ok = {
            let entry = self.quotas.entry(action.action_type.clone()).or_insert_with(|| SyncMutex::new(QuotaWindow::default()));
            let mut window = entry.lock();
            window.try_consume(&self.config.quota)
        };
        if !quota_ok {
            return Some("quota_exceeded".to_string());
        }

        if let Some(last) = self.last_success.get(&action.idempotency_key) {
            if Utc::now() - *last.value() < Duration::seconds(self.config.cooldown_sec) {
                return Some("cooldown".to_string());
            }
        }

        if !self.breaker.check(&action.action_type) {
            return Some("circuit_breaker".to_string());
        }

        if self.budget_pressure.load(Ordering::SeqCst) || self.resource_budget.under_pressure() {
            return Some("budget_pressure".to_string());
        }

        None
    }

    fn finalize_skipped(&self, mut action: Action, reason: String) -> Action {
        action.status = ActionStatus::Skipped;
        action.skip_reason = Some(reason.clone());
        action.finalized_at = Some(Utc::now());
        self.emit(&action, "action.skipped", Severity::Warn, json!({"reason": reason}));
        self.by_action_id.insert(action.action_id, action.idempotency_key.clone());
        self.records.insert(action.idempotency_key.clone(), SyncMutex::new(action.clone()));
        self.record_receipt(&action);
        action
    }

    /// Wire up the bus subscriptions that correlate Scheduler lifecycle
    /// events back to the Action record that spawned the underlying task.
    pub fn subscribe_completions(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.bus.subscribe("scheduler.task_completed", Arc::new(move |e: &Event| {
            this.on_task_completed(e);
            Ok(())
        }));

        let this = Arc::clone(self);
        self.bus.subscribe("scheduler.task_failed", Arc::new(move |e: &Event| {
            this.on_task_terminal_failure(e, false);
            Ok(())
        }));

        let this = Arc::clone(self);
        self.bus.subscribe("scheduler.task_timeout", Arc::new(move |e: &Event| {
            this.on_task_terminal_failure(e, true);
            Ok(())
        }));
    }

    fn task_id_from(event: &Event) -> Option<Uuid> {
        event.payload.get("task_id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
    }

    fn on_task_completed(&self, event: &Event) {
        let Some(task_id) = Self::task_id_from(event) else { return };
        let Some((_, idempotency_key)) = self.by_task_id.remove(&task_id) else { return };
        let Some(record) = self.records.get(&idempotency_key) else { return };
        let mut action = record.lock();
        action.status = ActionStatus::Succeeded;
        action.result = event.payload.get("result").cloned();
        action.finalized_at = Some(Utc::now());
        self.last_success.insert(idempotency_key, Utc::now());
        self.breaker.record_success(&action.action_type);
        self.emit(&action, "action.succeeded", Severity::Info, json!({}));
        self.record_receipt(&action);
    }

    fn on_task_terminal_failure(&self, event: &Event, is_timeout: bool) {
        let Some(task_id) = Self::task_id_from(event) else { return };
        let Some((_, idempotency_key)) = self.by_task_id.remove(&task_id) else { return };
        let Some(record) = self.records.get(&idempotency_key) else { return };
        let mut action = record.lock();
        action.status = ActionStatus::Failed;
        let reason = event.payload.get("reason").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let attempts = event.payload.get("attempts").and_then(Value::as_u64).unwrap_or(1);
        action.attempts = attempts as u32;
        action.result = Some(json!({"error": reason, "timeout": is_timeout}));
        action.finalized_at = Some(Utc::now());

        // A first-occurrence RETRYABLE failure doesn't count against the
        // breaker (spec §4.E); everything else does.
        let first_retryable = !is_timeout && reason == FailureKind::Retryable.to_string() && attempts <= 1;
        if !first_retryable {
            self.breaker.record_failure(&action.action_type);
        }
        self.emit(&action, "action.failed", Severity::Err, json!({"reason": reason}));
        self.record_receipt(&action);
    }

    fn emit(&self, action: &Action, event_type: &str, severity: Severity, mut payload: Value) {
        if let Value::Object(map) = &mut payload {
            map.insert("action_id".to_string(), json!(action.action_id));
            map.insert("action_type".to_string(), json!(action.action_type));
            map.insert("idempotency_key".to_string(), json!(action.idempotency_key));
        }
        let _ = self.bus.emit(Event::new(event_type, "aios-scheduler", severity, "action_queue", payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::executor::{Executor, ExecutorOutcome};
    use aios_types::EventFilter;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::tempdir;

    struct AlwaysOk;
    #[async_trait]
    impl Executor for AlwaysOk {
        async fn execute(&self, _params: &Value) -> ExecutorOutcome {
            ExecutorOutcome::success("ok", Some(json!({"done": true})))
        }
    }

    struct AlwaysRunning(String);
    impl ProcessChecker for AlwaysRunning {
        fn is_running(&self, name: &str) -> bool {
            name == self.0
        }
    }

    fn bus() -> Arc<EventBus> {
        let dir = tempdir().unwrap();
        Arc::new(EventBus::new(dir.into_path()).unwrap())
    }

    fn setup() -> (Arc<EventBus>, Arc<ActionQueue>) {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 4, crate::scheduler::RetryConfig::default());
        scheduler.spawn();
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let queue = ActionQueue::new(Arc::clone(&bus), scheduler, breaker, ActionQueueConfig::default());
        queue.subscribe_completions();
        queue.register_executor("restart_service", Arc::new(AlwaysOk));
        (bus, queue)
    }

    #[tokio::test]
    async fn high_risk_unapproved_action_is_skipped_needing_approval() {
        let (_bus, queue) = setup();
        let action = Action::new("restart_service", "host1", json!({}), Priority::P0, None);
        let result = queue.enqueue(action).await;
        assert_eq!(result.status, ActionStatus::Skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("needs_approval"));
    }

    #[tokio::test]
    async fn approved_action_executes_and_eventually_succeeds() {
        let (bus, queue) = setup();
        let mut action = Action::new("restart_service", "host1", json!({}), Priority::P0, None);
        action.approved = true;
        let enqueued = queue.enqueue(action).await;
        assert_eq!(enqueued.status, ActionStatus::Running);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let status = queue.status(enqueued.action_id).unwrap();
        assert_eq!(status.status, ActionStatus::Succeeded);

        let events = bus.load_events(&EventFilter { event_type: Some("action.succeeded".into()), ..Default::default() });
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_enqueue_while_in_flight_returns_existing_record() {
        let (_bus, queue) = setup();
        let mut action = Action::new("restart_service", "host1", json!({"k": 1}), Priority::P1, None);
        action.approved = true;
        let first = queue.enqueue(action.clone()).await;
        let second = queue.enqueue(action).await;
        assert_eq!(first.action_id, second.action_id);
    }

    #[tokio::test]
    async fn preflight_noop_short_circuits_without_executing() {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 4, crate::scheduler::RetryConfig::default());
        scheduler.spawn();
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let queue = ActionQueue::new(Arc::clone(&bus), scheduler, breaker, ActionQueueConfig::default())
            .with_process_checker(Arc::new(AlwaysRunning("worker".to_string())));
        queue.register_executor("restart_service", Arc::new(AlwaysOk));

        let mut action = Action::new("restart_service", "host1", json!({}), Priority::P1, None);
        action.process_name = Some("worker".to_string());
        let result = queue.enqueue(action).await;
        assert_eq!(result.status, ActionStatus::Skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("noop_already_running"));
    }

    #[tokio::test]
    async fn quota_exhaustion_skips_further_actions_of_same_type() {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 4, crate::scheduler::RetryConfig::default());
        scheduler.spawn();
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let mut config = ActionQueueConfig::default();
        config.quota = QuotaConfig { per_hour: 1, per_day: 10 };
        let queue = ActionQueue::new(Arc::clone(&bus), scheduler, breaker, config);
        queue.register_executor("restart_service", Arc::new(AlwaysOk));

        let mut a1 = Action::new("restart_service", "host1", json!({"n": 1}), Priority::P1, None);
        a1.approved = true;
        let mut a2 = Action::new("restart_service", "host2", json!({"n": 2}), Priority::P1, None);
        a2.approved = true;

        let r1 = queue.enqueue(a1).await;
        let r2 = queue.enqueue(a2).await;
        assert_eq!(r1.status, ActionStatus::Running);
        assert_eq!(r2.status, ActionStatus::Skipped);
        assert_eq!(r2.skip_reason.as_deref(), Some("quota_exceeded"));
    }

    #[tokio::test]
    async fn resource_budget_under_pressure_skips_new_actions() {
        let (_bus, queue) = setup();
        queue.resource_budget().consume(999.0);

        let mut action = Action::new("restart_service", "host1", json!({}), Priority::P1, None);
        action.approved = true;
        let result = queue.enqueue(action).await;
        assert_eq!(result.status, ActionStatus::Skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("budget_pressure"));
    }

    #[tokio::test]
    async fn finalized_actions_are_appended_to_the_receipt_store() {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 4, crate::scheduler::RetryConfig::default());
        scheduler.spawn();
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let dir = tempdir().unwrap();
        let store = Arc::new(crate::receipt::ReceiptStore::new(dir.path().join("receipts.json")).unwrap());
        let queue = ActionQueue::new(Arc::clone(&bus), scheduler, breaker, ActionQueueConfig::default())
            .with_receipt_store(Arc::clone(&store));
        queue.register_executor("restart_service", Arc::new(AlwaysOk));

        let mut action = Action::new("restart_service", "host1", json!({}), Priority::P1, None);
        action.approved = true;
        let enqueued = queue.enqueue(action).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let _ = queue.status(enqueued.action_id);

        let receipts = store.load_all().unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].action_id, enqueued.action_id);
    }

    #[tokio::test]
    async fn skipped_actions_are_appended_to_the_receipt_store() {
        let (_bus, queue) = setup();
        let dir = tempdir().unwrap();
        let store = Arc::new(crate::receipt::ReceiptStore::new(dir.path().join("receipts.json")).unwrap());
        let queue = queue.with_receipt_store(Arc::clone(&store));

        let action = Action::new("restart_service", "host1", json!({}), Priority::P0, None);
        let result = queue.enqueue(action).await;
        assert_eq!(result.status, ActionStatus::Skipped);

        let receipts = store.load_all().unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].skip_reason.as_deref(), Some("needs_approval"));
    }
}
