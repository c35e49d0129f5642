//! Per-key circuit breaker (spec §4.D).
//!
//! Each key - typically `(event_type, playbook_id)` or an `action_type` -
//! gets its own `CLOSED` / `OPEN` / `HALF_OPEN` state machine, guarded by its
//! own lock so that a busy key never blocks an unrelated one.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Observable state of a single breaker key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tunables for a `CircuitBreaker`. All breakers in a process share one
/// config; keys do not currently have per-key overrides.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub max_triggers_in_window: usize,
    pub window_seconds: i64,
    pub max_failures: usize,
    pub failure_window_seconds: i64,
    pub cooldown_seconds: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_triggers_in_window: 10,
            window_seconds: 60,
            max_failures: 5,
            failure_window_seconds: 300,
            cooldown_seconds: 60,
        }
    }
}

/// Snapshot returned by `CircuitBreaker::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub trigger_count: usize,
    pub failure_count: usize,
    pub opened_at: Option<DateTime<Utc>>,
}

struct KeyState {
    state: BreakerState,
    triggers: VecDeque<DateTime<Utc>>,
    failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    /// Set while a `HALF_OPEN` probe is outstanding, so a second concurrent
    /// caller doesn't also get waved through.
    probe_in_flight: bool,
}

impl KeyState {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            triggers: VecDeque::new(),
            failures: VecDeque::new(),
            opened_at: None,
            probe_in_flight: false,
        }
    }

    fn expire(deque: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window_seconds: i64) {
        let cutoff = now - Duration::seconds(window_seconds);
        while deque.front().is_some_and(|t| *t < cutoff) {
            deque.pop_front();
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.probe_in_flight = false;
        self.triggers.clear();
        self.failures.clear();
    }
}

/// Fine-grained, per-key circuit breaker. Cheap to share: clone the `Arc`
/// around it, not the breaker itself.
pub struct CircuitBreaker {
    config: BreakerConfig,
    keys: DashMap<String, Mutex<KeyState>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, keys: DashMap::new() }
    }

    /// `true` if a request against `key` may proceed right now. Transitions
    /// `OPEN -> HALF_OPEN` once the cooldown has elapsed and grants exactly
    /// one probe.
    pub fn check(&self, key: &str) -> bool {
        let now = Utc::now();
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        let mut state = entry.lock();
        match state.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooldown_elapsed = state
                    .opened_at
                    .is_some_and(|opened| now - opened >= Duration::seconds(self.config.cooldown_seconds));
                if cooldown_elapsed {
                    state.state = BreakerState::HalfOpen;
                    state.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if state.probe_in_flight {
                    false
                } else {
                    state.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record that `key` fired (was matched/invoked). Once
    /// `max_triggers_in_window` triggers land inside `window_seconds`, the
    /// key trips to `OPEN`.
    pub fn record_trigger(&self, key: &str) {
        let now = Utc::now();
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        let mut state = entry.lock();
        KeyState::expire(&mut state.triggers, now, self.config.window_seconds);
        state.triggers.push_back(now);
        if state.state == BreakerState::Closed && state.triggers.len() >= self.config.max_triggers_in_window {
            state.open(now);
        }
    }

    /// Record a success against `key`. In `HALF_OPEN` this closes the
    /// breaker and clears its history; in `CLOSED` it is a no-op (successes
    /// don't need to offset the failure window, only its own expiry does).
    pub fn record_success(&self, key: &str) {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        let mut state = entry.lock();
        if state.state == BreakerState::HalfOpen {
            state.close();
        }
    }

    /// Record a failure against `key`. Trips `OPEN` from `CLOSED` once
    /// `max_failures` land inside `failure_window_seconds`; from
    /// `HALF_OPEN`, a single failure re-opens immediately and resets the
    /// cooldown clock.
    pub fn record_failure(&self, key: &str) {
        let now = Utc::now();
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        let mut state = entry.lock();
        if state.state == BreakerState::HalfOpen {
            state.open(now);
            return;
        }
        KeyState::expire(&mut state.failures, now, self.config.failure_window_seconds);
        state.failures.push_back(now);
        if state.state == BreakerState::Closed && state.failures.len() >= self.config.max_failures {
            state.open(now);
        }
    }

    /// Force `key` back to `CLOSED` and clear its history, regardless of
    /// current state. Used by the external reset path (CLI `circuit reset`,
    /// spec §4.D), distinct from the automatic `HALF_OPEN` recovery that
    /// `record_success` performs.
    pub fn reset(&self, key: &str) {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        entry.lock().close();
    }

    /// Every key this breaker has ever seen a trigger/success/failure for.
    /// Used by status surfaces that enumerate breakers rather than query one
    /// key at a time.
    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().map(|e| e.key().clone()).collect()
    }

    pub fn status(&self, key: &str) -> BreakerStatus {
        let now = Utc::now();
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Mutex::new(KeyState::new()));
        let mut state = entry.lock();
        KeyState::expire(&mut state.triggers, now, self.config.window_seconds);
        KeyState::expire(&mut state.failures, now, self.config.failure_window_seconds);
        BreakerStatus {
            state: state.state,
            trigger_count: state.triggers.len(),
            failure_count: state.failures.len(),
            opened_at: state.opened_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_config() -> BreakerConfig {
        BreakerConfig {
            max_triggers_in_window: 3,
            window_seconds: 60,
            max_failures: 2,
            failure_window_seconds: 60,
            cooldown_seconds: 0, // immediate cooldown for deterministic tests
        }
    }

    #[test]
    fn closed_by_default_and_passes_requests() {
        let cb = CircuitBreaker::new(BreakerConfig::default());
        assert!(cb.check("k"));
        assert_eq!(cb.status("k").state, BreakerState::Closed);
    }

    #[test]
    fn trips_open_after_failure_threshold() {
        let cb = CircuitBreaker::new(tight_config());
        cb.record_failure("k");
        cb.record_failure("k");
        assert_eq!(cb.status("k").state, BreakerState::Open);
        // cooldown_seconds = 0, so the very next check transitions to
        // half-open and grants the probe.
        assert!(cb.check("k"));
        assert_eq!(cb.status("k").state, BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_and_clears_history() {
        let cb = CircuitBreaker::new(tight_config());
        cb.record_failure("k");
        cb.record_failure("k");
        assert!(cb.check("k")); // -> half-open probe
        cb.record_success("k");
        let status = cb.status("k");
        assert_eq!(status.state, BreakerState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[test]
    fn half_open_failure_reopens_with_cooldown_reset() {
        let cb = CircuitBreaker::new(tight_config());
        cb.record_failure("k");
        cb.record_failure("k");
        assert!(cb.check("k")); // -> half-open
        cb.record_failure("k");
        assert_eq!(cb.status("k").state, BreakerState::Open);
    }

    #[test]
    fn only_one_probe_allowed_while_half_open() {
        let cb = CircuitBreaker::new(tight_config());
        cb.record_failure("k");
        cb.record_failure("k");
        assert!(cb.check("k")); // first probe granted
        assert!(!cb.check("k")); // second concurrent caller rejected
    }

    #[test]
    fn trips_open_on_trigger_frequency() {
        let cb = CircuitBreaker::new(tight_config());
        cb.record_trigger("k");
        cb.record_trigger("k");
        cb.record_trigger("k");
        assert_eq!(cb.status("k").state, BreakerState::Open);
    }

    #[test]
    fn reset_forces_closed_from_any_state() {
        let cb = CircuitBreaker::new(tight_config());
        cb.record_failure("k");
        cb.record_failure("k");
        assert_eq!(cb.status("k").state, BreakerState::Open);
        cb.reset("k");
        let status = cb.status("k");
        assert_eq!(status.state, BreakerState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[test]
    fn keys_are_independent() {
        let cb = CircuitBreaker::new(tight_config());
        cb.record_failure("a");
        cb.record_failure("a");
        assert_eq!(cb.status("a").state, BreakerState::Open);
        assert_eq!(cb.status("b").state, BreakerState::Closed);
    }
}
