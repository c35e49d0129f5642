//! Threshold Monitor (spec §4.B): debounce noisy continuous signals into
//! `threshold_candidate` / `threshold_confirmed` / `recovered` events.

use aios_bus::EventBus;
use aios_types::{Event, Severity};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

/// Which side of the threshold counts as "bad", inferred from the relative
/// ordering of `trigger_threshold` and `recover_threshold` (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// High-is-bad: triggers at `value >= trigger_threshold`.
    Above,
    /// Low-is-bad: triggers at `value <= trigger_threshold`.
    Below,
}

impl Direction {
    fn infer(trigger: f64, recover: f64) -> Self {
        if recover < trigger {
            Self::Above
        } else {
            Self::Below
        }
    }

    fn triggered(self, value: f64, trigger: f64) -> bool {
        match self {
            Self::Above => value >= trigger,
            Self::Below => value <= trigger,
        }
    }

    fn recovered(self, value: f64, recover: f64) -> bool {
        match self {
            Self::Above => value < recover,
            Self::Below => value > recover,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricConfig {
    pub trigger_threshold: f64,
    pub recover_threshold: f64,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricState {
    Idle,
    Candidate,
    Confirmed,
}

struct KeyState {
    state: MetricState,
    since: Option<DateTime<Utc>>,
}

/// Per-metric-key debounce state machine.
pub struct ThresholdMonitor {
    bus: Arc<EventBus>,
    configs: DashMap<String, MetricConfig>,
    states: DashMap<String, Mutex<KeyState>>,
}

impl ThresholdMonitor {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { bus, configs: DashMap::new(), states: DashMap::new() })
    }

    pub fn configure(&self, metric_key: impl Into<String>, config: MetricConfig) {
        self.configs.insert(metric_key.into(), config);
    }

    /// Feed one observation for `metric_key` under `namespace` (e.g.
    /// `resource`, producing `resource.threshold_candidate` etc). Returns
    /// silently if the metric has no configured thresholds.
    pub fn observe(&self, namespace: &str, metric_key: &str, value: f64) {
        let Some(config) = self.configs.get(metric_key).map(|c| *c.value()) else {
            return;
        };
        let direction = Direction::infer(config.trigger_threshold, config.recover_threshold);
        let now = Utc::now();

        let entry = self.states.entry(metric_key.to_string()).or_insert_with(|| Mutex::new(KeyState { state: MetricState::Idle, since: None }));
        let mut key_state = entry.lock();

        match key_state.state {
            MetricState::Idle => {
                if direction.triggered(value, config.trigger_threshold) {
                    key_state.state = MetricState::Candidate;
                    key_state.since = Some(now);
                    self.emit(namespace, "threshold_candidate", Severity::Warn, metric_key, value);
                }
            }
            MetricState::Candidate => {
                if direction.triggered(value, config.trigger_threshold) {
                    let elapsed = now - key_state.since.unwrap_or(now);
                    if elapsed >= Duration::seconds(config.duration_seconds) {
                        key_state.state = MetricState::Confirmed;
                        self.emit(namespace, "threshold_confirmed", Severity::Err, metric_key, value);
                    }
                } else {
                    key_state.state = MetricState::Idle;
                    key_state.since = None;
                }
            }
            MetricState::Confirmed => {
                if direction.recovered(value, config.recover_threshold) {
                    key_state.state = MetricState::Idle;
                    key_state.since = None;
                    self.emit(namespace, "recovered", Severity::Info, metric_key, value);
                }
                // Between recover_threshold and trigger_threshold: hysteresis
                // band, state preserved, no event.
            }
        }
    }

    fn emit(&self, namespace: &str, suffix: &str, severity: Severity, metric_key: &str, value: f64) {
        let event_type = format!("{namespace}.{suffix}");
        let _ = self.bus.emit(Event::new(
            event_type,
            "aios-reactor",
            severity,
            "threshold_monitor",
            json!({"metric_key": metric_key, "value": value}),
        ));
    }
}
