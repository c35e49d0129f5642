//! Executor registry for the Action Queue (spec §4.E).
//!
//! Built-in executors cover `shell`, `http`, and `tool` dispatch; additional
//! executors can be registered at runtime (append-only, per spec).

use crate::handler::HandlerError;
use aios_types::FailureKind;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Outcome of one executor invocation.
pub struct ExecutorOutcome {
    pub ok: bool,
    pub detail: String,
    pub result: Option<Value>,
}

impl ExecutorOutcome {
    pub fn success(detail: impl Into<String>, result: Option<Value>) -> Self {
        Self { ok: true, detail: detail.into(), result }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self { ok: false, detail: detail.into(), result: None }
    }

    pub fn into_handler_result(self) -> Result<Value, HandlerError> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(HandlerError::new(self.detail))
        }
    }
}

/// Uniform capability every executor implements (spec §4.E).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, params: &Value) -> ExecutorOutcome;
}

/// Bounded subprocess executor with a hard timeout on the child.
pub struct ShellExecutor {
    pub timeout: Duration,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30) }
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, params: &Value) -> ExecutorOutcome {
        let Some(command) = params.get("command").and_then(Value::as_str) else {
            return ExecutorOutcome::failure("invalid configuration: missing `command`");
        };
        debug!(command, "shell executor invoking command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match child {
            Ok(c) => c,
            Err(e) => return ExecutorOutcome::failure(format!("environment error spawning shell: {e}")),
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => ExecutorOutcome::success(
                "command succeeded",
                Some(Value::String(String::from_utf8_lossy(&output.stdout).into_owned())),
            ),
            Ok(Ok(output)) => ExecutorOutcome::failure(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )),
            Ok(Err(e)) => ExecutorOutcome::failure(format!("environment error waiting on shell: {e}")),
            Err(_) => ExecutorOutcome::failure("timeout waiting for shell command"),
        }
    }
}

/// One-shot HTTP executor. Classifies gateway/timeout responses as
/// retryable per the shared taxonomy.
pub struct HttpExecutor {
    pub client: reqwest::Client,
    pub timeout: Duration,
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self { client: reqwest::Client::new(), timeout: Duration::from_secs(10) }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, params: &Value) -> ExecutorOutcome {
        let Some(url) = params.get("url").and_then(Value::as_str) else {
            return ExecutorOutcome::failure("invalid configuration: missing `url`");
        };
        let method = params.get("method").and_then(Value::as_str).unwrap_or("GET");

        let request = self.client.request(method.parse().unwrap_or(reqwest::Method::GET), url);
        match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(resp)) if resp.status().is_success() => {
                ExecutorOutcome::success(format!("http {}", resp.status()), None)
            }
            Ok(Ok(resp)) => {
                let status = resp.status().as_u16();
                ExecutorOutcome::failure(format!("http {status} gateway error"))
            }
            Ok(Err(e)) => ExecutorOutcome::failure(format!("connection reset: {e}")),
            Err(_) => ExecutorOutcome::failure("timeout waiting for http response"),
        }
    }
}

/// Named, in-process tool dispatch. Tools are plain sync/async closures
/// registered by the host application.
pub struct ToolExecutor<F>
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    pub name: String,
    pub func: F,
}

#[async_trait]
impl<F> Executor for ToolExecutor<F>
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    async fn execute(&self, params: &Value) -> ExecutorOutcome {
        match (self.func)(params) {
            Ok(value) => ExecutorOutcome::success(format!("tool `{}` succeeded", self.name), Some(value)),
            Err(detail) => {
                warn!(tool = %self.name, %detail, "tool execution failed");
                ExecutorOutcome::failure(detail)
            }
        }
    }
}

/// Classify a raw executor outcome into the shared taxonomy, overriding the
/// generic heuristic when the executor already knows it hit an UNKNOWN case
/// that should be treated conservatively (spec §4.E: UNKNOWN -> RETRYABLE).
pub fn classify_outcome(detail: &str) -> FailureKind {
    FailureKind::classify(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn shell_executor_runs_and_captures_stdout() {
        let exec = ShellExecutor::default();
        let outcome = exec.execute(&json!({"command": "echo hi"})).await;
        assert!(outcome.ok);
        assert_eq!(outcome.result.unwrap().as_str().unwrap().trim(), "hi");
    }

    #[tokio::test]
    async fn shell_executor_reports_non_zero_exit_as_failure() {
        let exec = ShellExecutor::default();
        let outcome = exec.execute(&json!({"command": "exit 1"})).await;
        assert!(!outcome.ok);
    }

    #[tokio::test]
    async fn tool_executor_dispatches_to_registered_function() {
        let exec = ToolExecutor { name: "double".into(), func: |p: &Value| {
            let n = p.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({"doubled": n * 2}))
        }};
        let outcome = exec.execute(&json!({"n": 21})).await;
        assert!(outcome.ok);
        assert_eq!(outcome.result.unwrap()["doubled"], 42);
    }
}
