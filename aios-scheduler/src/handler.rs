//! Task handler registry types for the Priority Scheduler (spec §4.F).

use aios_types::FailureKind;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// A handler-reported failure. If the handler doesn't know its own
/// classification, `new` derives one from the detail string using the same
/// heuristics the Action Queue's executors use (spec §4.E).
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub kind: FailureKind,
    pub detail: String,
}

impl HandlerError {
    pub fn new(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let kind = FailureKind::classify(&detail);
        Self { kind, detail }
    }

    pub fn with_kind(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// A registered task handler: takes the task's payload, returns a result or
/// a classified failure. Boxed and cloneable so the registry can hand out
/// owned closures to spawned workers.
pub type HandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
