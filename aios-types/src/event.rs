//! The `Event` record: the only thing components exchange (spec §3, §4.A).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event severity, carried on the wire as an enum rather than a free string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Err,
    Crit,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Err => "ERR",
            Self::Crit => "CRIT",
        };
        f.write_str(s)
    }
}

/// An immutable record published on the Event Bus.
///
/// `event_type` is a dotted namespace string (`resource.cpu_spike`,
/// `scheduler.decision`, ...). Events are never mutated after construction;
/// every field here is set once, at `Event::new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 128-bit identifier, globally unique.
    pub id: Uuid,
    /// Dotted namespace type, e.g. `resource.cpu_spike`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Logical source/emitter name.
    pub source: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Severity classification.
    pub severity: Severity,
    /// Free-form architectural layer tag (e.g. `resource`, `scheduler`).
    pub layer: String,
    /// Free-form payload.
    pub payload: Value,
}

impl Event {
    /// Build a new event with a fresh id and the current timestamp.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
        layer: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now().timestamp_millis(),
            severity,
            layer: layer.into(),
            payload,
        }
    }

    /// Build an event with an explicit timestamp - used by tests and journal
    /// replay where the wall clock must not be consulted.
    pub fn with_timestamp(
        event_type: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
        layer: impl Into<String>,
        payload: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp,
            severity,
            layer: layer.into(),
            payload,
        }
    }

    /// The timestamp as a UTC `DateTime`, for display and arithmetic.
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }

    /// Best-effort extraction of a human-readable message from the payload,
    /// used by the Reactor's `message_contains` trigger predicate.
    pub fn message(&self) -> String {
        self.payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_default()
    }

    /// `rule_id` field from the payload, if present - used by the Reactor's
    /// `rule_id` trigger predicate.
    pub fn rule_id(&self) -> Option<&str> {
        self.payload.get("rule_id").and_then(Value::as_str)
    }
}

/// Filter applied to `load_events`/`count_events` (spec §4.A).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub since_ts: Option<i64>,
    pub until_ts: Option<i64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Whether `event` satisfies this filter (`limit` is applied by the
    /// caller after ordering, not here).
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(t) = &self.event_type {
            if &event.event_type != t {
                return false;
            }
        }
        if let Some(since) = self.since_ts {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until_ts {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}
