//! The Reactor (spec §4.G): playbook-indexed event matching, guarded
//! execution via the Action Queue, verification, cooldown dynamics, and
//! policy-learning playbook disablement.

use crate::fuse::GlobalFuse;
use aios_bus::{EventBus, SubscriptionTrie};
use aios_scheduler::ActionQueue;
use aios_types::{Action, ActionStatus, Event, ExecutionMode, Playbook, Priority, Risk, Severity, VerifySpec};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::process::Command;
use tracing::{instrument, warn};
use uuid::Uuid;

const DEFAULT_OUTCOME_WINDOW: usize = 20;
const DEFAULT_DISABLE_FLOOR: f64 = 0.1;
const DEFAULT_FUSE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    /// Global override: forces every playbook into dry-run regardless of
    /// its own `require_confirm` setting.
    pub dry_run: bool,
    pub fuse_threshold: u32,
    /// Size of the rolling per-playbook outcome window feeding
    /// `success_rate` (cooldown dynamics and policy learning).
    pub outcome_window: usize,
    /// A playbook is auto-disabled once its success rate over a full
    /// window drops below this floor.
    pub disable_floor: f64,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            fuse_threshold: DEFAULT_FUSE_THRESHOLD,
            outcome_window: DEFAULT_OUTCOME_WINDOW,
            disable_floor: DEFAULT_DISABLE_FLOOR,
        }
    }
}

struct Runtime {
    hit_count: AtomicU32,
    outcomes: Mutex<VecDeque<bool>>,
    disabled_by_policy: std::sync::atomic::AtomicBool,
}

impl Default for Runtime {
    fn default() -> Self {
        Self { hit_count: AtomicU32::new(0), outcomes: Mutex::new(VecDeque::new()), disabled_by_policy: std::sync::atomic::AtomicBool::new(false) }
    }
}

struct CooldownState {
    until: Option<DateTime<Utc>>,
}

struct ExecutionRecord {
    playbook_id: String,
    event_type: String,
    total: usize,
    completed: usize,
    any_failed: bool,
}

struct PendingConfirm {
    playbook_id: String,
    event: Event,
}

fn priority_for_risk(risk: Risk) -> Priority {
    match risk {
        Risk::High => Priority::P0,
        Risk::Medium => Priority::P1,
        Risk::Low => Priority::P3,
    }
}

/// Playbook-driven remediation engine.
pub struct Reactor {
    bus: Arc<EventBus>,
    action_queue: Arc<ActionQueue>,
    fuse: Arc<GlobalFuse>,
    playbooks: DashMap<String, Mutex<Playbook>>,
    runtime: DashMap<String, Runtime>,
    rule_trie: RwLock<SubscriptionTrie>,
    trie_id_to_playbook: DashMap<u64, String>,
    next_trie_id: AtomicU64,
    keyword_index: DashMap<String, Vec<String>>,
    cooldowns: DashMap<(String, String), Mutex<CooldownState>>,
    pending_confirm: DashMap<Uuid, PendingConfirm>,
    executions: DashMap<Uuid, Mutex<ExecutionRecord>>,
    action_to_execution: DashMap<Uuid, Uuid>,
    config: ReactorConfig,
}

impl Reactor {
    pub fn new(bus: Arc<EventBus>, action_queue: Arc<ActionQueue>, config: ReactorConfig) -> Arc<Self> {
        Arc::new(Self {
            bus,
            action_queue,
            fuse: Arc::new(GlobalFuse::new(config.fuse_threshold)),
            playbooks: DashMap::new(),
            runtime: DashMap::new(),
            rule_trie: RwLock::new(SubscriptionTrie::new()),
            trie_id_to_playbook: DashMap::new(),
            next_trie_id: AtomicU64::new(1),
            keyword_index: DashMap::new(),
            cooldowns: DashMap::new(),
            pending_confirm: DashMap::new(),
            executions: DashMap::new(),
            action_to_execution: DashMap::new(),
            config,
        })
    }

    pub fn fuse(&self) -> &GlobalFuse {
        &self.fuse
    }

    /// Load a playbook, indexing its trigger into `rule_trie` and
    /// `keyword_index` (spec §4.G: "Build two indices at playbook load").
    pub fn load_playbook(&self, playbook: Playbook) {
        let id = self.next_trie_id.fetch_add(1, Ordering::SeqCst);
        self.rule_trie.write().insert(&playbook.trigger.event_pattern, id);
        self.trie_id_to_playbook.insert(id, playbook.id.clone());

        if let Some(subs) = &playbook.trigger.message_contains {
            for token in subs {
                self.keyword_index.entry(token.to_ascii_lowercase()).or_default().push(playbook.id.clone());
            }
        }

        self.runtime.insert(playbook.id.clone(), Runtime::default());
        self.playbooks.insert(playbook.id.clone(), Mutex::new(playbook));
    }

    pub fn disable_playbook(&self, playbook_id: &str) {
        if let Some(pb) = self.playbooks.get(playbook_id) {
            pb.lock().enabled = false;
        }
    }

    pub fn enable_playbook(&self, playbook_id: &str) {
        if let Some(pb) = self.playbooks.get(playbook_id) {
            pb.lock().enabled = true;
        }
        if let Some(rt) = self.runtime.get(playbook_id) {
            rt.disabled_by_policy.store(false, Ordering::SeqCst);
            rt.outcomes.lock().clear();
        }
    }

    /// Snapshot of every loaded playbook, in load order. Used by status
    /// surfaces; mutating the returned copies has no effect on the reactor.
    pub fn playbooks(&self) -> Vec<Playbook> {
        self.playbooks.iter().map(|e| e.value().lock().clone()).collect()
    }

    pub fn success_rate(&self, playbook_id: &str) -> f64 {
        let Some(rt) = self.runtime.get(playbook_id) else { return 1.0 };
        let outcomes = rt.outcomes.lock();
        if outcomes.is_empty() {
            return 1.0;
        }
        outcomes.iter().filter(|o| **o).count() as f64 / outcomes.len() as f64
    }

    /// Wire the full event subscription plus the outcome-correlation
    /// subscriptions that close the loop with the Action Queue.
    pub fn subscribe(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.bus.subscribe(
            "**",
            Arc::new(move |e: &Event| {
                let event = e.clone();
                let this = Arc::clone(&this);
                tokio::spawn(async move { this.handle_event(event).await });
                Ok(())
            }),
        );

        for (event_type, outcome_ok) in [("action.succeeded", true), ("action.failed", false), ("action.skipped", false)] {
            let this = Arc::clone(self);
            self.bus.subscribe(
                event_type,
                Arc::new(move |e: &Event| {
                    this.on_action_terminal(e, outcome_ok);
                    Ok(())
                }),
            );
        }

        let this = Arc::clone(self);
        self.bus.subscribe(
            "reactor.fuse.reset",
            Arc::new(move |_e: &Event| {
                this.fuse.reset();
                Ok(())
            }),
        );
    }

    fn candidate_playbook_ids(&self, event: &Event) -> HashSet<String> {
        let mut out = HashSet::new();
        for id in self.rule_trie.read().matches(&event.event_type) {
            if let Some(pb) = self.trie_id_to_playbook.get(&id) {
                out.insert(pb.value().clone());
            }
        }
        let msg = event.message().to_ascii_lowercase();
        if !msg.is_empty() {
            for entry in self.keyword_index.iter() {
                if msg.contains(entry.key().as_str()) {
                    out.extend(entry.value().iter().cloned());
                }
            }
        }
        out
    }

    fn full_match(playbook: &Playbook, event: &Event) -> bool {
        if !playbook.pattern_matches(&event.event_type) {
            return false;
        }
        if let Some(list) = &playbook.trigger.severity_list {
            if !list.contains(&event.severity) {
                return false;
            }
        }
        if let Some(rid) = &playbook.trigger.rule_id {
            if event.rule_id() != Some(rid.as_str()) {
                return false;
            }
        }
        if let Some(subs) = &playbook.trigger.message_contains {
            let msg = event.message().to_ascii_lowercase();
            if !subs.iter().all(|s| msg.contains(&s.to_ascii_lowercase())) {
                return false;
            }
        }
        true
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn handle_event(self: Arc<Self>, event: Event) {
        if self.fuse.is_tripped() {
            return;
        }

        for playbook_id in self.candidate_playbook_ids(&event) {
            let Some(playbook) = self.playbooks.get(&playbook_id).map(|p| p.lock().clone()) else { continue };
            if !playbook.enabled {
                continue;
            }
            let Some(runtime) = self.runtime.get(&playbook_id) else { continue };
            if runtime.disabled_by_policy.load(Ordering::SeqCst) {
                continue;
            }
            if !Self::full_match(&playbook, &event) {
                continue;
            }

            if let Some(min_hits) = playbook.trigger.min_hit_count {
                let count = runtime.hit_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count < min_hits {
                    continue;
                }
            }
            drop(runtime);

            if self.in_cooldown(&event.event_type, &playbook_id) {
                continue;
            }

            let effective_mode = if self.config.dry_run {
                ExecutionMode::DryRun
            } else if playbook.require_confirm {
                ExecutionMode::Confirm
            } else {
                ExecutionMode::Auto
            };

            match effective_mode {
                ExecutionMode::DryRun => self.emit_dry_run(&playbook, &event),
                ExecutionMode::Confirm => self.request_confirm(&playbook, &event),
                ExecutionMode::Auto => self.clone().execute_playbook(&playbook_id, &event).await,
            }
        }
    }

    fn in_cooldown(&self, event_type: &str, playbook_id: &str) -> bool {
        let key = (event_type.to_string(), playbook_id.to_string());
        self.cooldowns.get(&key).is_some_and(|s| s.lock().until.is_some_and(|t| Utc::now() < t))
    }

    fn set_cooldown(&self, event_type: &str, playbook_id: &str, base_sec: u64) {
        let rate = self.success_rate(playbook_id);
        let extended = rate < 0.5;
        let effective_sec = if extended { base_sec.saturating_mul(2) } else { base_sec };
        let key = (event_type.to_string(), playbook_id.to_string());
        let until = Utc::now() + Duration::seconds(effective_sec as i64);
        self.cooldowns.entry(key).or_insert_with(|| Mutex::new(CooldownState { until: None })).lock().until = Some(until);
    }

    fn emit_dry_run(&self, playbook: &Playbook, event: &Event) {
        let actions: Vec<_> = playbook
            .actions
            .iter()
            .map(|a| json!({"action_type": a.action_type, "target": a.target}))
            .collect();
        self.emit("reactor.dry_run_plan", Severity::Info, json!({"playbook_id": playbook.id, "event_id": event.id, "actions": actions}));
    }

    fn request_confirm(&self, playbook: &Playbook, event: &Event) {
        let confirm_id = Uuid::new_v4();
        self.pending_confirm.insert(confirm_id, PendingConfirm { playbook_id: playbook.id.clone(), event: event.clone() });
        self.emit("reactor.pending_confirm", Severity::Warn, json!({"confirm_id": confirm_id, "playbook_id": playbook.id}));
    }

    /// Approve a pending confirmation, executing its playbook. Returns
    /// `false` if `confirm_id` is unknown or already resolved.
    pub async fn approve(self: &Arc<Self>, confirm_id: Uuid) -> bool {
        let Some((_, pending)) = self.pending_confirm.remove(&confirm_id) else { return false };
        self.clone().execute_playbook(&pending.playbook_id, &pending.event).await;
        true
    }

    pub fn reject(&self, confirm_id: Uuid) {
        if let Some((_, pending)) = self.pending_confirm.remove(&confirm_id) {
            self.emit("reactor.confirm_rejected", Severity::Info, json!({"confirm_id": confirm_id, "playbook_id": pending.playbook_id}));
        }
    }

    async fn execute_playbook(self: Arc<Self>, playbook_id: &str, event: &Event) {
        let Some(playbook) = self.playbooks.get(playbook_id).map(|p| p.lock().clone()) else { return };
        if playbook.actions.is_empty() {
            return;
        }

        let execution_id = Uuid::new_v4();
        self.executions.insert(
            execution_id,
            Mutex::new(ExecutionRecord {
                playbook_id: playbook_id.to_string(),
                event_type: event.event_type.clone(),
                total: playbook.actions.len(),
                completed: 0,
                any_failed: false,
            }),
        );

        for template in &playbook.actions {
            let priority = priority_for_risk(playbook.risk);
            let mut action = Action::new(template.action_type.clone(), template.target.clone(), template.params.clone(), priority, Some(playbook.risk));
            action.approved = true;
            self.action_to_execution.insert(action.action_id, execution_id);
            self.action_queue.enqueue(action).await;
        }
    }

    fn on_action_terminal(self: &Arc<Self>, event: &Event, succeeded: bool) {
        let Some(action_id) = event.payload.get("action_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok()) else { return };
        let Some((_, execution_id)) = self.action_to_execution.remove(&action_id) else { return };
        let Some(record) = self.executions.get(&execution_id) else { return };

        let finished = {
            let mut rec = record.lock();
            rec.completed += 1;
            if !succeeded {
                rec.any_failed = true;
            }
            rec.completed >= rec.total
        };

        if finished {
            drop(record);
            let this = Arc::clone(self);
            tokio::spawn(async move { this.finalize_execution(execution_id).await });
        }
    }

    async fn finalize_execution(self: Arc<Self>, execution_id: Uuid) {
        let Some((_, record)) = self.executions.remove(&execution_id) else { return };
        let record = record.into_inner();
        let Some(playbook) = self.playbooks.get(&record.playbook_id).map(|p| p.lock().clone()) else { return };

        self.set_cooldown(&record.event_type, &playbook.id, playbook.cooldown_sec);

        let verified = if record.any_failed { false } else { self.run_verify(playbook.verify.as_ref()).await };
        let overall_success = !record.any_failed && verified;

        self.record_outcome(&playbook.id, overall_success);

        if overall_success {
            self.fuse.record_success();
        } else if self.fuse.record_failure() {
            warn!(playbook_id = %playbook.id, "global fuse tripped");
            self.emit("reactor.fuse.tripped", Severity::Crit, json!({"playbook_id": playbook.id}));
        }

        self.emit(
            "reactor.execution_complete",
            if overall_success { Severity::Info } else { Severity::Err },
            json!({"playbook_id": playbook.id, "success": overall_success, "verified": verified}),
        );
    }

    fn record_outcome(&self, playbook_id: &str, success: bool) {
        let Some(runtime) = self.runtime.get(playbook_id) else { return };
        let mut outcomes = runtime.outcomes.lock();
        if outcomes.len() == self.config.outcome_window {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
        let window_full = outcomes.len() == self.config.outcome_window;
        let rate = outcomes.iter().filter(|o| **o).count() as f64 / outcomes.len() as f64;
        drop(outcomes);

        if window_full && rate < self.config.disable_floor {
            runtime.disabled_by_policy.store(true, Ordering::SeqCst);
            self.emit("reactor.playbook_disabled", Severity::Warn, json!({"playbook_id": playbook_id, "success_rate": rate}));
        }
    }

    async fn run_verify(&self, verify: Option<&VerifySpec>) -> bool {
        let Some(verify) = verify else { return true };

        if let Some(command) = &verify.command {
            return match Command::new("sh").arg("-c").arg(command).status().await {
                Ok(status) => status.success(),
                Err(e) => {
                    warn!(error = %e, "verify command failed to spawn");
                    false
                }
            };
        }

        if let Some(sub_id) = &verify.playbook_id {
            return self.run_verify_playbook(sub_id).await;
        }

        true
    }

    async fn run_verify_playbook(&self, playbook_id: &str) -> bool {
        let Some(playbook) = self.playbooks.get(playbook_id).map(|p| p.lock().clone()) else { return false };
        let mut action_ids = Vec::with_capacity(playbook.actions.len());
        for template in &playbook.actions {
            let priority = priority_for_risk(playbook.risk);
            let mut action = Action::new(template.action_type.clone(), template.target.clone(), template.params.clone(), priority, Some(playbook.risk));
            action.approved = true;
            let action_id = action.action_id;
            self.action_queue.enqueue(action).await;
            action_ids.push(action_id);
        }

        for _ in 0..25 {
            let all_terminal = action_ids.iter().all(|id| self.action_queue.status(*id).is_some_and(|a| a.status.is_terminal()));
            if all_terminal {
                return action_ids.iter().all(|id| self.action_queue.status(*id).is_some_and(|a| a.status == ActionStatus::Succeeded));
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }
        false
    }

    fn emit(&self, event_type: &str, severity: Severity, payload: serde_json::Value) {
        let _ = self.bus.emit(Event::new(event_type, "aios-reactor", severity, "reactor", payload));
    }
}
