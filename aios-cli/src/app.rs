//! Composition root: wires the Event Bus, Scheduler, Action Queue, Circuit
//! Breaker, Reactor, Threshold Monitor, and Score Engine into one running
//! process (spec §6, "the core exposes library entry points").

use aios_bus::EventBus;
use aios_config::{AiosConfig, StatePaths};
use aios_reactor::{MetricConfig, Reactor, ReactorConfig, ScoreEngine, ThresholdMonitor};
use aios_scheduler::{
    ActionQueue, ActionQueueConfig, BreakerConfig, BudgetConfig, CircuitBreaker, HttpExecutor, QuotaConfig, ReceiptStore, RetryConfig, Scheduler,
    ShellExecutor,
};
use std::sync::Arc;

pub struct App {
    pub config: AiosConfig,
    pub paths: StatePaths,
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    pub breaker: Arc<CircuitBreaker>,
    pub action_queue: Arc<ActionQueue>,
    pub reactor: Arc<Reactor>,
    pub threshold: Arc<ThresholdMonitor>,
    pub score: Arc<ScoreEngine>,
    pub receipts: Arc<ReceiptStore>,
}

impl App {
    /// Build the full component graph from the effective configuration and
    /// load the persisted playbook catalog. Does not spawn the dispatcher
    /// loop or start accepting work - call `start()` for that.
    pub fn build() -> anyhow::Result<Self> {
        let config = aios_config::load()?;
        let paths = StatePaths::new(aios_config::home_dir());
        let bus = Arc::new(EventBus::new(paths.events_dir())?);

        let retry = RetryConfig::default();
        let scheduler = Scheduler::new(Arc::clone(&bus), num_cpus(), retry);

        let breaker_config = BreakerConfig {
            max_triggers_in_window: config.breaker.max_triggers_in_window,
            window_seconds: config.breaker.window_seconds,
            max_failures: config.breaker.max_failures,
            failure_window_seconds: config.breaker.failure_window_seconds,
            cooldown_seconds: config.breaker.cooldown_seconds,
        };
        let breaker = Arc::new(CircuitBreaker::new(breaker_config));

        let action_queue_config = ActionQueueConfig {
            cooldown_sec: config.action_cooldown_sec as i64,
            quota: QuotaConfig { per_hour: config.quota_per_hour as usize, per_day: config.quota_per_day as usize },
            execution_timeout_sec: config.execution_timeout_sec,
            execution_max_retries: config.execution_max_retries,
            budget: BudgetConfig { ceiling: config.budget_ceiling, pressure_fraction: config.budget_pressure_fraction },
        };
        let receipts = Arc::new(ReceiptStore::new(paths.receipts_file())?);
        let action_queue = ActionQueue::new(Arc::clone(&bus), Arc::clone(&scheduler), Arc::clone(&breaker), action_queue_config)
            .with_receipt_store(Arc::clone(&receipts));
        action_queue.register_executor("shell", Arc::new(ShellExecutor::default()));
        action_queue.register_executor("http", Arc::new(HttpExecutor::default()));

        let reactor_config =
            ReactorConfig { dry_run: false, fuse_threshold: config.fuse_threshold, outcome_window: config.outcome_window, disable_floor: config.disable_floor };
        let reactor = Reactor::new(Arc::clone(&bus), Arc::clone(&action_queue), reactor_config);

        let catalog = aios_reactor::catalog::load(&paths.playbooks_file())?;
        let loaded = catalog.len();
        for playbook in catalog {
            reactor.load_playbook(playbook);
        }
        tracing::debug!(loaded, "playbook catalog loaded");

        let threshold = ThresholdMonitor::new(Arc::clone(&bus));
        for (metric_key, m) in &config.metrics {
            threshold.configure(
                metric_key.clone(),
                MetricConfig { trigger_threshold: m.trigger_threshold, recover_threshold: m.recover_threshold, duration_seconds: m.duration_seconds },
            );
        }

        let score = ScoreEngine::new(Arc::clone(&bus));
        for (event_type, weight) in &config.score_weights {
            score.set_weight(event_type.clone(), *weight);
        }

        Ok(Self { config, paths, bus, scheduler, breaker, action_queue, reactor, threshold, score, receipts })
    }

    /// Wire live subscriptions and spawn the dispatcher loop. Idempotent to
    /// call once per process.
    pub fn start(&self) {
        self.scheduler.spawn();
        self.scheduler.subscribe_decisions();
        self.action_queue.subscribe_completions();
        self.reactor.subscribe();
        self.score.subscribe();
    }

    /// Give in-flight async reactions (Reactor dispatch, Scheduler retries)
    /// a chance to run, then drain the Scheduler before the process exits.
    /// A one-shot CLI has no other way to observe the consequences of the
    /// command it just issued.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        self.scheduler.stop().await;
        let _ = self.bus.flush();
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
