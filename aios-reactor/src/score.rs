//! Score Engine (spec §4.C): a sliding-window "evolution score" computed
//! lazily from a signed per-event-type weight table, with hysteresis around
//! 0.5 to avoid chattering `score.degraded` / `score.recovered` events.

use aios_bus::EventBus;
use aios_types::{Event, Severity};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

const BASE_SCORE: f64 = 0.5;
const HYSTERESIS: f64 = 0.05;
const DEFAULT_WINDOW: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthState {
    Healthy,
    Degraded,
}

struct Cached {
    value: f64,
    dirty: bool,
    state: HealthState,
}

/// Sliding-window health estimator, subscribed to the full event stream.
/// The score itself is computed lazily: `observe` only marks the cache
/// dirty; the next call to `score()` recomputes and, if the result crosses
/// the hysteresis band, emits the transition event.
pub struct ScoreEngine {
    bus: Arc<EventBus>,
    window_size: usize,
    window: Mutex<VecDeque<Event>>,
    weights: DashMap<String, f64>,
    cached: Mutex<Cached>,
}

impl ScoreEngine {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Self::with_window(bus, DEFAULT_WINDOW)
    }

    pub fn with_window(bus: Arc<EventBus>, window_size: usize) -> Arc<Self> {
        let engine = Arc::new(Self {
            bus,
            window_size,
            window: Mutex::new(VecDeque::with_capacity(window_size)),
            weights: DashMap::new(),
            cached: Mutex::new(Cached { value: BASE_SCORE, dirty: false, state: HealthState::Healthy }),
        });
        engine.install_default_weights();
        engine
    }

    fn install_default_weights(&self) {
        self.set_weight("reactor.success", 0.02);
        self.set_weight("agent.error", -0.03);
        self.set_weight("resource.threshold_confirmed", -0.05);
        self.set_weight("pipeline.completed", 0.01);
    }

    pub fn set_weight(&self, event_type: impl Into<String>, weight: f64) {
        self.weights.insert(event_type.into(), weight);
    }

    /// Wire the `**` subscription that feeds the ring buffer.
    pub fn subscribe(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.bus.subscribe("**", Arc::new(move |e: &Event| {
            this.observe(e.clone());
            Ok(())
        }));
    }

    fn observe(&self, event: Event) {
        let mut window = self.window.lock();
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(event);
        drop(window);
        self.cached.lock().dirty = true;
    }

    /// Current score, recomputing from the window if anything has been
    /// observed since the last query.
    pub fn score(&self) -> f64 {
        let needs_recompute = self.cached.lock().dirty;
        if !needs_recompute {
            return self.cached.lock().value;
        }

        let window = self.window.lock();
        let contribution: f64 = window
            .iter()
            .map(|e| self.weights.get(&e.event_type).map(|w| *w.value()).unwrap_or(0.0))
            .sum();
        drop(window);
        let score = (BASE_SCORE + contribution).clamp(0.0, 1.0);

        let (prior_state, transitioned) = {
            let mut cached = self.cached.lock();
            let prior_state = cached.state;
            cached.value = score;
            cached.dirty = false;
            let new_state = match prior_state {
                HealthState::Healthy if score < BASE_SCORE - HYSTERESIS => Some(HealthState::Degraded),
                HealthState::Degraded if score > BASE_SCORE + HYSTERESIS => Some(HealthState::Healthy),
                _ => None,
            };
            if let Some(s) = new_state {
                cached.state = s;
            }
            (prior_state, new_state)
        };

        if let Some(new_state) = transitioned {
            match (prior_state, new_state) {
                (HealthState::Healthy, HealthState::Degraded) => self.emit("score.degraded", Severity::Warn, score),
                (HealthState::Degraded, HealthState::Healthy) => self.emit("score.recovered", Severity::Info, score),
                _ => {}
            }
        }

        score
    }

    fn emit(&self, event_type: &str, severity: Severity, score: f64) {
        let _ = self.bus.emit(Event::new(event_type, "aios-reactor", severity, "score", json!({"score": score})));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aios_types::{EventFilter, Severity as Sev};
    use serde_json::json as j;
    use tempfile::tempdir;

    fn bus() -> Arc<EventBus> {
        let dir = tempdir().unwrap();
        Arc::new(EventBus::new(dir.into_path()).unwrap())
    }

    fn push(engine: &Arc<ScoreEngine>, ty: &str) {
        engine.bus.emit(Event::new(ty, "test", Sev::Warn, "l", j!({}))).unwrap();
    }

    #[test]
    fn starts_at_base_score() {
        let bus = bus();
        let engine = ScoreEngine::new(bus);
        assert_eq!(engine.score(), 0.5);
    }

    #[test]
    fn negative_contributions_lower_the_score() {
        let bus = bus();
        let engine = ScoreEngine::new(bus);
        engine.subscribe();
        for _ in 0..3 {
            push(&engine, "agent.error");
        }
        assert!(engine.score() < 0.5);
    }

    #[test]
    fn crossing_below_hysteresis_band_emits_degraded_once() {
        let bus = bus();
        let engine = ScoreEngine::new(Arc::clone(&bus));
        engine.subscribe();
        for _ in 0..10 {
            push(&engine, "agent.error");
        }
        assert!(engine.score() < 0.45);
        let degraded = bus.load_events(&EventFilter { event_type: Some("score.degraded".into()), ..Default::default() });
        assert_eq!(degraded.len(), 1);
    }

    #[test]
    fn recovering_above_hysteresis_band_emits_recovered() {
        let bus = bus();
        let engine = ScoreEngine::new(Arc::clone(&bus));
        engine.subscribe();
        for _ in 0..10 {
            push(&engine, "agent.error");
        }
        let _ = engine.score(); // force the degrade transition to land
        for _ in 0..20 {
            push(&engine, "reactor.success");
        }
        assert!(engine.score() > 0.55);
        let recovered = bus.load_events(&EventFilter { event_type: Some("score.recovered".into()), ..Default::default() });
        assert_eq!(recovered.len(), 1);
    }
}
