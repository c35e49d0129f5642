//! Priority Scheduler (spec §4.F): bounded-concurrency dispatcher over a
//! priority queue of `Task`s, with per-task timeout, retry, and backoff.

use crate::error::{Result, SchedulerError};
use crate::handler::HandlerFn;
use crate::queue::TaskQueue;
use aios_bus::EventBus;
use aios_types::{Event, FailureKind, Severity, Task, TaskState};
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Exponential backoff schedule for retries (spec §4.F defaults).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_delay: Duration::from_secs(2), factor: 2, max_delay: Duration::from_secs(30) }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(self.factor.saturating_pow(attempt));
        scaled.min(self.max_delay)
    }
}

/// Bounded-concurrency priority task executor.
pub struct Scheduler {
    bus: Arc<EventBus>,
    handlers: DashMap<String, HandlerFn>,
    queue: Mutex<TaskQueue>,
    notify: Notify,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    inflight: Arc<AtomicUsize>,
    retry: RetryConfig,
}

impl Scheduler {
    pub fn new(bus: Arc<EventBus>, max_concurrency: usize, retry: RetryConfig) -> Arc<Self> {
        Arc::new(Self {
            bus,
            handlers: DashMap::new(),
            queue: Mutex::new(TaskQueue::new()),
            notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            running: Arc::new(AtomicBool::new(true)),
            inflight: Arc::new(AtomicUsize::new(0)),
            retry,
        })
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(name.into(), handler);
    }

    /// Enqueue `task`, emitting `scheduler.task_submitted`. No-op once
    /// `stop()` has been called.
    #[instrument(skip(self, task), fields(task_id = %task.task_id, priority = %task.priority))]
    pub async fn submit(&self, task: Task) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            warn!("scheduler stopped; dropping submitted task");
            return Ok(());
        }
        self.emit(&task, "scheduler.task_submitted", Severity::Info, json!({}))?;
        self.queue.lock().await.push(task);
        self.notify.notify_one();
        Ok(())
    }

    /// Spawn the dispatcher loop. The returned handle resolves once `stop()`
    /// has drained all in-flight work.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.dispatch_loop().await })
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let next = { self.queue.lock().await.pop() };
            let Some(task) = next else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
                continue;
            };

            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                break;
            };
            self.inflight.fetch_add(1, Ordering::SeqCst);
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_task(task).await;
                drop(permit);
                this.inflight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    /// Stop accepting new work and wait for in-flight tasks to reach a
    /// terminal state. There is no forced kill (spec §5).
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        while self.inflight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.task_id, attempt = task.retries))]
    async fn run_task(self: &Arc<Self>, mut task: Task) {
        task.state = TaskState::Running;
        let _ = self.emit(&task, "scheduler.task_started", Severity::Info, json!({"attempt": task.retries}));

        let Some(handler) = self.handlers.get(&task.handler_ref).map(|h| Arc::clone(h.value())) else {
            task.state = TaskState::Failed;
            task.error = Some(format!("{}", SchedulerError::UnknownHandler(task.handler_ref.clone())));
            let _ = self.emit(&task, "scheduler.task_failed", Severity::Err, json!({"reason": "unknown_handler"}));
            return;
        };

        let payload = task.payload.clone();
        let outcome = tokio::time::timeout(Duration::from_secs(task.timeout_sec), handler(payload)).await;

        match outcome {
            Err(_elapsed) => self.finish_timeout(task).await,
            Ok(Ok(result)) => {
                task.state = TaskState::Completed;
                task.result = Some(result.clone());
                let _ = self.emit(&task, "scheduler.task_completed", Severity::Info, json!({"result": result}));
            }
            Ok(Err(handler_error)) => self.finish_failure(task, handler_error.kind, handler_error.detail).await,
        }
    }

    async fn finish_timeout(self: &Arc<Self>, mut task: Task) {
        debug!(task_id = %task.task_id, "task timed out");
        let _ = self.emit(&task, "scheduler.task_timeout", Severity::Warn, json!({"attempt": task.retries}));
        if task.retries < task.max_retries {
            self.requeue_after_backoff(task).await;
        } else {
            task.state = TaskState::Timeout;
            task.error = Some("timeout budget exhausted".to_string());
            let attempts = task.retries + 1;
            let _ = self.emit(&task, "scheduler.task_failed", Severity::Err, json!({"reason": "timeout", "attempts": attempts}));
        }
    }

    async fn finish_failure(self: &Arc<Self>, mut task: Task, kind: FailureKind, detail: String) {
        warn!(task_id = %task.task_id, %kind, %detail, "task attempt failed");
        if kind.is_retryable() && task.retries < task.max_retries {
            task.error = Some(detail);
            self.requeue_after_backoff(task).await;
        } else {
            task.state = TaskState::Failed;
            task.error = Some(detail);
            let attempts = task.retries + 1;
            let _ = self.emit(&task, "scheduler.task_failed", Severity::Err, json!({"reason": kind.to_string(), "attempts": attempts}));
        }
    }

    async fn requeue_after_backoff(self: &Arc<Self>, mut task: Task) {
        let attempt = task.retries;
        task.retries += 1;
        task.state = TaskState::Queued;
        let delay = self.retry.delay_for_attempt(attempt);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.running.load(Ordering::SeqCst) {
                this.queue.lock().await.push(task);
                this.notify.notify_one();
            }
        });
    }

    fn emit(&self, task: &Task, event_type: &str, severity: Severity, mut payload: serde_json::Value) -> Result<()> {
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("task_id".to_string(), json!(task.task_id));
            map.insert("name".to_string(), json!(task.name));
            map.insert("priority".to_string(), json!(task.priority.to_string()));
        }
        self.bus
            .emit(Event::new(event_type, "aios-scheduler", severity, "scheduler", payload))
            .map_err(SchedulerError::from)
    }

    /// Subscribe the decision path (spec §4.F): high-level cues on the bus
    /// become `scheduler.decision` events. Consumers (the Reactor, etc.)
    /// decide independently whether to act on them.
    pub fn subscribe_decisions(self: &Arc<Self>) {
        let bus = Arc::clone(&self.bus);
        let emit_decision = Arc::new(move |decision: &str, source_event: &Event| {
            let _ = bus.emit(Event::new(
                "scheduler.decision",
                "aios-scheduler",
                Severity::Info,
                "scheduler",
                json!({"decision": decision, "source_event_id": source_event.id, "source_event_type": source_event.event_type}),
            ));
        });

        let d1 = Arc::clone(&emit_decision);
        self.bus.subscribe("resource.threshold_confirmed", Arc::new(move |e: &Event| {
            d1("trigger_reactor", e);
            Ok(())
        }));

        let d2 = Arc::clone(&emit_decision);
        self.bus.subscribe("agent.error", Arc::new(move |e: &Event| {
            d2("diagnose_agent", e);
            Ok(())
        }));

        let d3 = emit_decision;
        self.bus.subscribe("pipeline.completed", Arc::new(move |e: &Event| {
            d3("log", e);
            Ok(())
        }));
    }

    /// Unique id helper for callers composing ad-hoc task names.
    pub fn new_task_id() -> Uuid {
        Uuid::new_v4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use aios_types::{EventFilter, Priority};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use tempfile::tempdir;

    fn bus() -> Arc<EventBus> {
        let dir = tempdir().unwrap();
        // leak the tempdir so the bus outlives the test body without an
        // explicit lifetime thread; fine for short-lived unit tests.
        let path = dir.into_path();
        Arc::new(EventBus::new(path).unwrap())
    }

    #[tokio::test]
    async fn successful_task_emits_lifecycle_in_order() {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 2, RetryConfig::default());
        scheduler.register_handler("echo", Arc::new(|payload: serde_json::Value| {
            Box::pin(async move { Ok(payload) })
        }));
        scheduler.spawn();

        let task = Task::new("t1", Priority::P0, "echo", json!({"x": 1}), 5, 0);
        scheduler.submit(task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        let events = bus.load_events(&EventFilter::default());
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["scheduler.task_submitted", "scheduler.task_started", "scheduler.task_completed"]
        );
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_until_budget_exhausted() {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 2, RetryConfig {
            base_delay: Duration::from_millis(1),
            factor: 1,
            max_delay: Duration::from_millis(5),
        });
        let attempts = Arc::new(StdAtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        scheduler.register_handler("flaky", Arc::new(move |_payload: serde_json::Value| {
            let a = Arc::clone(&a);
            Box::pin(async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::new("connection reset"))
            })
        }));
        scheduler.spawn();

        let task = Task::new("t1", Priority::P0, "flaky", json!({}), 5, 2);
        scheduler.submit(task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3); // initial + 2 retries
        let events = bus.load_events(&EventFilter { event_type: Some("scheduler.task_failed".into()), ..Default::default() });
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_immediately() {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 2, RetryConfig::default());
        scheduler.register_handler("bad_config", Arc::new(|_payload: serde_json::Value| {
            Box::pin(async move { Err(HandlerError::new("invalid configuration: missing key")) })
        }));
        scheduler.spawn();

        let task = Task::new("t1", Priority::P0, "bad_config", json!({}), 5, 3);
        scheduler.submit(task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        let events = bus.load_events(&EventFilter { event_type: Some("scheduler.task_failed".into()), ..Default::default() });
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn timeout_marks_task_as_timed_out_when_retries_exhausted() {
        let bus = bus();
        let scheduler = Scheduler::new(Arc::clone(&bus), 2, RetryConfig::default());
        scheduler.register_handler("slow", Arc::new(|_payload: serde_json::Value| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!({}))
            })
        }));
        scheduler.spawn();

        let task = Task::new("t1", Priority::P0, "slow", json!({}), 0, 0);
        scheduler.submit(task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        let events = bus.load_events(&EventFilter { event_type: Some("scheduler.task_timeout".into()), ..Default::default() });
        assert_eq!(events.len(), 1);
    }
}
