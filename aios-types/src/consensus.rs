//! The `Consensus Request` record for the optional Consensus extension
//! (spec §3, §4.H).

use serde::{Deserialize, Serialize};

/// Vote aggregation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusProtocol {
    Majority,
    Unanimous,
    Weighted,
}

/// One voter's ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter: String,
    pub option: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Outcome of a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusStatus {
    Open,
    Decided,
    Failed,
}

/// A named vote over a discrete option set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRequest {
    pub request_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub protocol: ConsensusProtocol,
    pub min_voters: usize,
    pub votes: Vec<Vote>,
    pub status: ConsensusStatus,
    pub decision: Option<String>,
}

impl ConsensusRequest {
    pub fn new(
        request_id: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
        protocol: ConsensusProtocol,
        min_voters: usize,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            question: question.into(),
            options,
            protocol,
            min_voters,
            votes: Vec::new(),
            status: ConsensusStatus::Open,
            decision: None,
        }
    }
}
