//! The cross-cutting error taxonomy from spec §7.
//!
//! Executors and verify steps report one of these outcomes rather than
//! raising; the Scheduler and Reactor decide retry-vs-terminate from the
//! kind alone.

use serde::{Deserialize, Serialize};

/// Classification of a non-success outcome, shared by the Scheduler, the
/// Action Queue, and the Reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transient failure expected to succeed on retry (timeouts, 502/503/504,
    /// 429, connection reset).
    Retryable,
    /// Permanent failure (permission, not-found, parse, config/env).
    NonRetryable,
    /// Deadline elapsed before completion.
    Timeout,
    /// A guardrail refused execution before it started.
    Skipped,
    /// The circuit breaker refused the request.
    CircuitOpen,
    /// The Reactor's global fuse is tripped.
    FuseTripped,
}

impl FailureKind {
    /// Whether this kind should consume a retry attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable | Self::Timeout)
    }

    /// Classify a raw error message/status using the heuristics from spec
    /// §4.E: gateway timeouts and connection resets are retryable, anything
    /// naming permission/parsing/config problems is not, everything else is
    /// treated as retryable with a conservative budget (`Unknown` collapses
    /// to `Retryable` per spec).
    pub fn classify(detail: &str) -> Self {
        let lower = detail.to_ascii_lowercase();
        const RETRYABLE_MARKERS: &[&str] = &[
            "timeout",
            "timed out",
            "connection reset",
            "502",
            "503",
            "504",
            "429",
        ];
        const NON_RETRYABLE_MARKERS: &[&str] = &[
            "permission denied",
            "not found",
            "parse error",
            "invalid configuration",
            "environment",
        ];
        if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Retryable
        } else if NON_RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::NonRetryable
        } else {
            Self::Retryable
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Retryable => "RETRYABLE",
            Self::NonRetryable => "NON_RETRYABLE",
            Self::Timeout => "TIMEOUT",
            Self::Skipped => "SKIPPED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::FuseTripped => "FUSE_TRIPPED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_gateway_errors_as_retryable() {
        assert_eq!(FailureKind::classify("HTTP 503 Service Unavailable"), FailureKind::Retryable);
        assert_eq!(FailureKind::classify("connection reset by peer"), FailureKind::Retryable);
    }

    #[test]
    fn classifies_permission_errors_as_non_retryable() {
        assert_eq!(FailureKind::classify("permission denied: /etc/shadow"), FailureKind::NonRetryable);
    }

    #[test]
    fn unknown_errors_default_to_retryable() {
        assert_eq!(FailureKind::classify("gremlins in the wire"), FailureKind::Retryable);
    }
}
