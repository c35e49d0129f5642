//! Action receipts (ambient addition, generalized from the reference
//! architecture's signed decision receipts down to a plain audit record):
//! every finalized `Action` gets one immutable line appended to the receipt
//! store, which backs the CLI's `history` verb.

use aios_types::{Action, ActionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Immutable record of one action's final outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub action_id: Uuid,
    pub action_type: String,
    pub target: String,
    pub idempotency_key: String,
    pub status: ActionStatus,
    pub attempts: u32,
    pub skip_reason: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
}

impl Receipt {
    /// Build a receipt from an action already in a terminal state.
    /// Returns `None` if `action` hasn't finalized yet.
    pub fn from_action(action: &Action) -> Option<Self> {
        if !action.status.is_terminal() {
            return None;
        }
        Some(Self {
            action_id: action.action_id,
            action_type: action.action_type.clone(),
            target: action.target.clone(),
            idempotency_key: action.idempotency_key.clone(),
            status: action.status,
            attempts: action.attempts,
            skip_reason: action.skip_reason.clone(),
            enqueued_at: action.enqueued_at,
            finalized_at: action.finalized_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Append-only JSONL receipt log, one process-wide writer guarded by a
/// single mutex - receipts are low-frequency compared to journal events, so
/// the per-shard complexity of the Event Bus's journal isn't needed here.
pub struct ReceiptStore {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl ReceiptStore {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn append(&self, receipt: &Receipt) -> io::Result<()> {
        let line = serde_json::to_string(receipt).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(file, "{line}")?;
        file.flush()
    }

    /// All receipts recorded so far, oldest first. Tolerates a torn final
    /// line the same way the journal does.
    pub fn load_all(&self) -> io::Result<Vec<Receipt>> {
        load_all(&self.path)
    }
}

fn load_all(path: &Path) -> io::Result<Vec<Receipt>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let mut receipts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(receipt) => receipts.push(receipt),
            Err(_) => break, // torn final line from a crash mid-write
        }
    }
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aios_types::Priority;
    use serde_json::json;
    use tempfile::tempdir;

    fn terminal_action() -> Action {
        let mut a = Action::new("shell", "host1", json!({}), Priority::P1, None);
        a.status = ActionStatus::Succeeded;
        a.finalized_at = Some(Utc::now());
        a
    }

    #[test]
    fn non_terminal_action_produces_no_receipt() {
        let action = Action::new("shell", "host1", json!({}), Priority::P1, None);
        assert!(Receipt::from_action(&action).is_none());
    }

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ReceiptStore::new(dir.path().join("receipts.json")).unwrap();
        let receipt = Receipt::from_action(&terminal_action()).unwrap();
        store.append(&receipt).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].action_id, receipt.action_id);
    }

    #[test]
    fn fresh_store_loads_as_empty() {
        let dir = tempdir().unwrap();
        let store = ReceiptStore::new(dir.path().join("receipts.json")).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
