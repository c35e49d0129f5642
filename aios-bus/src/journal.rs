//! Append-only, per-date-sharded journal (spec §4.A, §6).
//!
//! Each shard is a plain UTF-8 file, one JSON event per line, opened in
//! append mode. Fsync happens per batch (every [`Journal::fsync_every`]
//! writes), not per event, matching the spec's default. Readers tolerate a
//! partial final line: a crash mid-write leaves the intact prior records
//! readable and the torn tail silently skipped.

use crate::error::{BusError, Result};
use aios_types::Event;
use chrono::{Duration, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

const DEFAULT_FSYNC_EVERY: usize = 32;
const DEFAULT_RETENTION_DAYS: i64 = 14;

struct OpenShard {
    date: NaiveDate,
    file: File,
}

/// Owns the single writer for the journal directory. Reads may proceed
/// concurrently (they open their own file handles); writes serialize on
/// `writer`.
pub struct Journal {
    dir: PathBuf,
    writer: Mutex<Option<OpenShard>>,
    pending: AtomicUsize,
    fsync_every: usize,
    retention_days: i64,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writer: Mutex::new(None),
            pending: AtomicUsize::new(0),
            fsync_every: DEFAULT_FSYNC_EVERY,
            retention_days: DEFAULT_RETENTION_DAYS,
        })
    }

    pub fn with_fsync_every(mut self, n: usize) -> Self {
        self.fsync_every = n.max(1);
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    fn shard_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one event to today's shard, fsync'ing every `fsync_every`
    /// writes. A write or serialize failure is surfaced to the caller ,
    /// journal failures are fatal to the `emit` call (spec §4.A).
    pub fn append(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event).map_err(BusError::Serialize)?;
        let date = event.datetime().date_naive();

        let mut guard = self.writer.lock();
        let needs_new = match &guard.as_ref() {
            Some(shard) => shard.date != date,
            None => true,
        };
        if needs_new {
            let path = self.shard_path(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *guard = Some(OpenShard { date, file });
        }
        let shard = guard.as_mut().expect("shard just opened");
        writeln!(shard.file, "{line}")?;

        let count = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if count % self.fsync_every == 0 {
            shard.file.sync_data()?;
        }
        Ok(())
    }

    /// Force a flush regardless of the batch counter - used at shutdown and
    /// in tests.
    pub fn flush(&self) -> Result<()> {
        let guard = self.writer.lock();
        if let Some(shard) = guard.as_ref() {
            shard.file.sync_data()?;
        }
        Ok(())
    }

    fn shard_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        files
    }

    /// Read every intact event across all shards, in timestamp order
    /// (ties broken by read/insertion order), tolerating a torn final line.
    pub fn load_all(&self) -> Vec<Event> {
        let mut out = Vec::new();
        for path in self.shard_files() {
            out.extend(read_shard(&path));
        }
        out.sort_by_key(|e: &Event| e.timestamp);
        out
    }

    /// Delete shards older than `retention_days` relative to today.
    pub fn compact(&self) -> Result<usize> {
        let cutoff = Utc::now().date_naive() - Duration::days(self.retention_days);
        let mut removed = 0;
        for path in self.shard_files() {
            if let Some(date) = shard_date(&path) {
                if date < cutoff {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn shard_date(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Read every syntactically valid line from `path`. A line that fails to
/// parse (including a partial final line left by a crash mid-write) is
/// skipped rather than raising.
fn read_shard(path: &Path) -> Vec<Event> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    BufReader::new(file)
        .lines()
        .map_while(std::result::Result::ok)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Event>(&line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aios_types::Severity;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample(ts: i64) -> Event {
        Event::with_timestamp("resource.cpu_spike", "test", Severity::Warn, "resource", json!({"cpu_percent": 95}), ts)
    }

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path()).unwrap();
        let e1 = sample(1_000);
        let e2 = sample(2_000);
        journal.append(&e1).unwrap();
        journal.append(&e2).unwrap();
        journal.flush().unwrap();

        let loaded = journal.load_all();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, e1.id);
        assert_eq!(loaded[1].id, e2.id);
    }

    #[test]
    fn partial_final_line_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path()).unwrap();
        let e1 = sample(1_000);
        journal.append(&e1).unwrap();
        journal.flush().unwrap();

        // Simulate a crash mid-write: append a torn JSON fragment.
        let today = Utc::now().date_naive();
        let path = journal.shard_path(today);
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{{\"id\":\"not-f").unwrap();

        let loaded = journal.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, e1.id);
    }

    #[test]
    fn compact_removes_shards_older_than_retention() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path()).unwrap().with_retention_days(14);
        let old_date = Utc::now().date_naive() - Duration::days(30);
        let old_path = journal.shard_path(old_date);
        fs::write(&old_path, "").unwrap();
        let today_path = journal.shard_path(Utc::now().date_naive());
        fs::write(&today_path, "").unwrap();

        let removed = journal.compact().unwrap();
        assert_eq!(removed, 1);
        assert!(!old_path.exists());
        assert!(today_path.exists());
    }
}
