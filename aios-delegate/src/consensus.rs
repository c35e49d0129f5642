//! Consensus (spec §4.H): collect votes for a named question and decide
//! once quorum is reached, under one of three tallying protocols.

use aios_bus::EventBus;
use aios_types::{ConsensusProtocol, ConsensusRequest, ConsensusStatus, Event, Severity, Vote};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const TIE_EPSILON: f64 = 1e-9;

/// In-memory store of open/decided consensus requests.
pub struct ConsensusManager {
    bus: Arc<EventBus>,
    requests: DashMap<String, Mutex<ConsensusRequest>>,
}

impl ConsensusManager {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { bus, requests: DashMap::new() })
    }

    pub fn open(&self, request: ConsensusRequest) {
        let request_id = request.request_id.clone();
        self.emit(&request_id, "consensus.opened", Severity::Info, json!({"question": request.question}));
        self.requests.insert(request_id, Mutex::new(request));
    }

    /// Cast a ballot. Once `votes.len() >= min_voters` the request is
    /// tallied immediately under its configured protocol; further votes
    /// after a decision are ignored.
    pub fn vote(&self, request_id: &str, vote: Vote) -> Option<ConsensusStatus> {
        let entry = self.requests.get(request_id)?;
        let mut request = entry.lock();
        if request.status != ConsensusStatus::Open {
            return Some(request.status);
        }

        request.votes.push(vote);
        if request.votes.len() >= request.min_voters {
            Self::decide(&mut request);
        }
        let status = request.status;
        let decision = request.decision.clone();
        drop(request);

        if status != ConsensusStatus::Open {
            let event_type = if status == ConsensusStatus::Decided { "consensus.decided" } else { "consensus.failed" };
            self.emit(request_id, event_type, if status == ConsensusStatus::Decided { Severity::Info } else { Severity::Warn }, json!({"decision": decision}));
        }
        Some(status)
    }

    fn decide(request: &mut ConsensusRequest) {
        match request.protocol {
            ConsensusProtocol::Majority => {
                let mut tally: HashMap<&str, usize> = HashMap::new();
                for v in &request.votes {
                    *tally.entry(v.option.as_str()).or_insert(0) += 1;
                }
                Self::apply_integer_winner(request, tally);
            }
            ConsensusProtocol::Unanimous => {
                let first = request.votes.first().map(|v| v.option.clone());
                let unanimous = first.as_ref().is_some_and(|o| request.votes.iter().all(|v| &v.option == o));
                if unanimous {
                    request.status = ConsensusStatus::Decided;
                    request.decision = first;
                } else {
                    request.status = ConsensusStatus::Failed;
                }
            }
            ConsensusProtocol::Weighted => {
                let mut tally: HashMap<&str, f64> = HashMap::new();
                for v in &request.votes {
                    *tally.entry(v.option.as_str()).or_insert(0.0) += v.confidence;
                }
                Self::apply_float_winner(request, tally);
            }
        }
    }

    fn apply_integer_winner(request: &mut ConsensusRequest, tally: HashMap<&str, usize>) {
        let max = tally.values().copied().max().unwrap_or(0);
        let winners: Vec<&str> = tally.iter().filter(|(_, c)| **c == max).map(|(o, _)| *o).collect();
        if winners.len() == 1 {
            request.status = ConsensusStatus::Decided;
            request.decision = Some(winners[0].to_string());
        } else {
            request.status = ConsensusStatus::Failed;
        }
    }

    fn apply_float_winner(request: &mut ConsensusRequest, tally: HashMap<&str, f64>) {
        let max = tally.values().copied().fold(f64::MIN, f64::max);
        let winners: Vec<&str> = tally.iter().filter(|(_, c)| (**c - max).abs() < TIE_EPSILON).map(|(o, _)| *o).collect();
        if winners.len() == 1 {
            request.status = ConsensusStatus::Decided;
            request.decision = Some(winners[0].to_string());
        } else {
            request.status = ConsensusStatus::Failed;
        }
    }

    pub fn status(&self, request_id: &str) -> Option<ConsensusRequest> {
        self.requests.get(request_id).map(|r| r.lock().clone())
    }

    fn emit(&self, request_id: &str, event_type: &str, severity: Severity, mut payload: serde_json::Value) {
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("request_id".to_string(), json!(request_id));
        }
        let _ = self.bus.emit(Event::new(event_type, "aios-delegate", severity, "consensus", payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bus() -> Arc<EventBus> {
        let dir = tempdir().unwrap();
        Arc::new(EventBus::new(dir.into_path()).unwrap())
    }

    fn vote(voter: &str, option: &str, confidence: f64) -> Vote {
        Vote { voter: voter.to_string(), option: option.to_string(), confidence, reasoning: None }
    }

    #[test]
    fn majority_decides_once_quorum_reached() {
        let manager = ConsensusManager::new(bus());
        manager.open(ConsensusRequest::new("r1", "restart or rollback?", vec!["restart".into(), "rollback".into()], ConsensusProtocol::Majority, 3));
        manager.vote("r1", vote("a", "restart", 1.0));
        manager.vote("r1", vote("b", "restart", 1.0));
        let status = manager.vote("r1", vote("c", "rollback", 1.0));

        assert_eq!(status, Some(ConsensusStatus::Decided));
        assert_eq!(manager.status("r1").unwrap().decision.as_deref(), Some("restart"));
    }

    #[test]
    fn majority_tie_fails() {
        let manager = ConsensusManager::new(bus());
        manager.open(ConsensusRequest::new("r1", "a or b?", vec!["a".into(), "b".into()], ConsensusProtocol::Majority, 2));
        manager.vote("r1", vote("v1", "a", 1.0));
        let status = manager.vote("r1", vote("v2", "b", 1.0));

        assert_eq!(status, Some(ConsensusStatus::Failed));
    }

    #[test]
    fn unanimous_fails_on_any_dissent() {
        let manager = ConsensusManager::new(bus());
        manager.open(ConsensusRequest::new("r1", "proceed?", vec!["yes".into(), "no".into()], ConsensusProtocol::Unanimous, 2));
        manager.vote("r1", vote("v1", "yes", 1.0));
        let status = manager.vote("r1", vote("v2", "no", 1.0));

        assert_eq!(status, Some(ConsensusStatus::Failed));
    }

    #[test]
    fn weighted_sums_confidence_per_option() {
        let manager = ConsensusManager::new(bus());
        manager.open(ConsensusRequest::new("r1", "a or b?", vec!["a".into(), "b".into()], ConsensusProtocol::Weighted, 2));
        manager.vote("r1", vote("v1", "a", 0.9));
        let status = manager.vote("r1", vote("v2", "b", 0.3));

        assert_eq!(status, Some(ConsensusStatus::Decided));
        assert_eq!(manager.status("r1").unwrap().decision.as_deref(), Some("a"));
    }

    #[test]
    fn votes_after_decision_are_ignored() {
        let manager = ConsensusManager::new(bus());
        manager.open(ConsensusRequest::new("r1", "a or b?", vec!["a".into(), "b".into()], ConsensusProtocol::Majority, 1));
        manager.vote("r1", vote("v1", "a", 1.0));
        manager.vote("r1", vote("v2", "b", 1.0));

        assert_eq!(manager.status("r1").unwrap().votes.len(), 1);
    }
}
