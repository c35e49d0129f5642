//! Configuration schema (spec §6: metric thresholds, §4.C score weights,
//! §4.D/§4.E breaker and quota settings, §4.A journal retention).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_retention_days() -> u32 {
    14
}
fn default_fuse_threshold() -> u32 {
    5
}
fn default_outcome_window() -> usize {
    20
}
fn default_disable_floor() -> f64 {
    0.1
}
fn default_cooldown_sec() -> u64 {
    300
}
fn default_quota_per_hour() -> u32 {
    100
}
fn default_quota_per_day() -> u32 {
    1000
}
fn default_execution_timeout_sec() -> u64 {
    30
}
fn default_execution_max_retries() -> u32 {
    2
}
fn default_budget_ceiling() -> f64 {
    100.0
}
fn default_budget_pressure_fraction() -> f64 {
    0.9
}

/// Circuit breaker tuning (spec §4.D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_max_triggers")]
    pub max_triggers_in_window: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
    #[serde(default = "default_failure_window_seconds")]
    pub failure_window_seconds: i64,
    #[serde(default = "default_breaker_cooldown_seconds")]
    pub cooldown_seconds: i64,
}

fn default_max_triggers() -> usize {
    10
}
fn default_window_seconds() -> i64 {
    60
}
fn default_max_failures() -> usize {
    5
}
fn default_failure_window_seconds() -> i64 {
    300
}
fn default_breaker_cooldown_seconds() -> i64 {
    60
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_triggers_in_window: default_max_triggers(),
            window_seconds: default_window_seconds(),
            max_failures: default_max_failures(),
            failure_window_seconds: default_failure_window_seconds(),
            cooldown_seconds: default_breaker_cooldown_seconds(),
        }
    }
}

/// One Threshold Monitor metric configuration (spec §4.B).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub trigger_threshold: f64,
    pub recover_threshold: f64,
    pub duration_seconds: i64,
}

/// Top-level configuration, loaded from TOML and overridden by `AIOS_*`
/// environment variables (spec §6, precedence env > file > defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiosConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_fuse_threshold")]
    pub fuse_threshold: u32,
    #[serde(default = "default_outcome_window")]
    pub outcome_window: usize,
    #[serde(default = "default_disable_floor")]
    pub disable_floor: f64,
    #[serde(default = "default_cooldown_sec")]
    pub action_cooldown_sec: u64,
    #[serde(default = "default_quota_per_hour")]
    pub quota_per_hour: u32,
    #[serde(default = "default_quota_per_day")]
    pub quota_per_day: u32,
    #[serde(default = "default_execution_timeout_sec")]
    pub execution_timeout_sec: u64,
    #[serde(default = "default_execution_max_retries")]
    pub execution_max_retries: u32,
    #[serde(default = "default_budget_ceiling")]
    pub budget_ceiling: f64,
    #[serde(default = "default_budget_pressure_fraction")]
    pub budget_pressure_fraction: f64,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricThreshold>,
    #[serde(default = "default_score_weights")]
    pub score_weights: BTreeMap<String, f64>,
}

fn default_score_weights() -> BTreeMap<String, f64> {
    let mut m = BTreeMap::new();
    m.insert("reactor.success".to_string(), 0.02);
    m.insert("agent.error".to_string(), -0.03);
    m.insert("resource.threshold_confirmed".to_string(), -0.05);
    m.insert("pipeline.completed".to_string(), 0.01);
    m
}

impl Default for AiosConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            fuse_threshold: default_fuse_threshold(),
            outcome_window: default_outcome_window(),
            disable_floor: default_disable_floor(),
            action_cooldown_sec: default_cooldown_sec(),
            quota_per_hour: default_quota_per_hour(),
            quota_per_day: default_quota_per_day(),
            execution_timeout_sec: default_execution_timeout_sec(),
            execution_max_retries: default_execution_max_retries(),
            budget_ceiling: default_budget_ceiling(),
            budget_pressure_fraction: default_budget_pressure_fraction(),
            breaker: BreakerSettings::default(),
            metrics: BTreeMap::new(),
            score_weights: default_score_weights(),
        }
    }
}
