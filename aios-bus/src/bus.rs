//! The Event Bus: journal, then synchronous fan-out to matching subscribers
//! (spec §4.A).

use crate::error::Result;
use crate::journal::Journal;
use crate::trie::{SubId, SubscriptionTrie};
use aios_types::{Event, EventFilter};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{instrument, warn};

/// A subscriber callback. Receives a reference to the dispatched event;
/// returns `Err` to report a handled failure (logged, never propagated).
pub type Handler = Arc<dyn Fn(&Event) -> std::result::Result<(), String> + Send + Sync>;

/// Opaque token returned by `subscribe`, passed back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(SubId);

struct Subscriber {
    handler: Handler,
}

/// In-process, journaled publish/subscribe spine.
pub struct EventBus {
    journal: Journal,
    subscribers: DashMap<SubId, Subscriber>,
    trie: RwLock<SubscriptionTrie>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(journal_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            journal: Journal::new(journal_dir)?,
            subscribers: DashMap::new(),
            trie: RwLock::new(SubscriptionTrie::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Append `event` to the journal, then dispatch synchronously to every
    /// matching subscriber. A journal write failure is fatal to this call
    /// (spec §4.A); a subscriber failure (error return or panic) is logged
    /// and isolated - every other matching subscriber still runs.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = %event.id))]
    pub fn emit(&self, event: Event) -> Result<()> {
        self.journal.append(&event)?;

        let ids = self.trie.read().matches(&event.event_type);
        for id in ids {
            // `DashMap::get` after `unsubscribe`'s `remove` simply misses -
            // an in-flight id removed mid-dispatch is skipped, satisfying
            // "in-flight dispatches to the removed handler are allowed to
            // complete" for anything already running, and dropping cleanly
            // for anything not yet started.
            let Some(sub) = self.subscribers.get(&id) else {
                continue;
            };
            let handler = Arc::clone(&sub.handler);
            drop(sub);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => {
                    warn!(subscription = id, %reason, "subscriber returned an error");
                }
                Err(_) => {
                    warn!(subscription = id, "subscriber panicked; isolated from other subscribers");
                }
            }
        }
        Ok(())
    }

    /// Register `handler` under `pattern`. Order among handlers of equal
    /// specificity is not observable (spec §4.A).
    pub fn subscribe(&self, pattern: impl AsRef<str>, handler: Handler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, Subscriber { handler });
        self.trie.write().insert(pattern.as_ref(), id);
        SubscriptionHandle(id)
    }

    /// O(1) removal from the live subscriber map. The trie may retain a
    /// stale id (cleaned up lazily by `emit`'s map lookup) - acceptable
    /// because subscriptions are wired once at composition time and rarely
    /// churn at runtime.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers.remove(&handle.0);
    }

    /// Events matching `filter`, in timestamp order (ties by insertion
    /// order), truncated to `filter.limit` if set.
    pub fn load_events(&self, filter: &EventFilter) -> Vec<Event> {
        let mut matched: Vec<Event> = self
            .journal
            .load_all()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Cardinality of `load_events(filter)` without materializing the list
    /// beyond what the filter itself needs.
    pub fn count_events(&self, filter: &EventFilter) -> usize {
        self.journal.load_all().iter().filter(|e| filter.matches(e)).count()
    }

    /// Delete journal shards older than the configured retention window.
    pub fn compact_journal(&self) -> Result<usize> {
        self.journal.compact()
    }

    pub fn flush(&self) -> Result<()> {
        self.journal.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aios_types::Severity;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn event(ty: &str) -> Event {
        Event::new(ty, "test", Severity::Warn, "resource", json!({}))
    }

    #[test]
    fn fan_out_delivers_to_every_matching_subscriber() {
        let dir = tempdir().unwrap();
        let bus = EventBus::new(dir.path()).unwrap();
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&hits_a);
        bus.subscribe("resource.*", Arc::new(move |_e: &Event| {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let b = Arc::clone(&hits_b);
        bus.subscribe("resource.cpu_spike", Arc::new(move |_e: &Event| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.emit(event("resource.cpu_spike")).unwrap();

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_failing_subscriber_does_not_block_others() {
        let dir = tempdir().unwrap();
        let bus = EventBus::new(dir.path()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("x.y", Arc::new(|_e: &Event| Err("boom".to_string())));
        let h = Arc::clone(&hits);
        bus.subscribe("x.y", Arc::new(move |_e: &Event| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.emit(event("x.y")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_subscriber_is_isolated() {
        let dir = tempdir().unwrap();
        let bus = EventBus::new(dir.path()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("x.y", Arc::new(|_e: &Event| panic!("subscriber bug")));
        let h = Arc::clone(&hits);
        bus.subscribe("x.y", Arc::new(move |_e: &Event| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        bus.emit(event("x.y")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let dir = tempdir().unwrap();
        let bus = EventBus::new(dir.path()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let handle = bus.subscribe("x.y", Arc::new(move |_e: &Event| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        bus.unsubscribe(handle);
        bus.emit(event("x.y")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn load_events_respects_filter_and_limit() {
        let dir = tempdir().unwrap();
        let bus = EventBus::new(dir.path()).unwrap();
        bus.emit(event("a.b")).unwrap();
        bus.emit(event("a.c")).unwrap();
        bus.emit(event("a.b")).unwrap();

        let filter = EventFilter { event_type: Some("a.b".into()), limit: Some(1), ..Default::default() };
        let loaded = bus.load_events(&filter);
        assert_eq!(loaded.len(), 1);
        assert_eq!(bus.count_events(&EventFilter { event_type: Some("a.b".into()), ..Default::default() }), 2);
    }

    #[test]
    fn replay_from_empty_process_reconstructs_sequence() {
        let dir = tempdir().unwrap();
        let ids: Vec<_> = {
            let bus = EventBus::new(dir.path()).unwrap();
            let mut ids = Vec::new();
            for i in 0..5 {
                let e = event(&format!("a.{i}"));
                ids.push(e.id);
                bus.emit(e).unwrap();
            }
            bus.flush().unwrap();
            ids
        };

        // Fresh process: new EventBus instance over the same journal dir.
        let bus2 = EventBus::new(dir.path()).unwrap();
        let replayed = bus2.load_events(&EventFilter::default());
        let replayed_ids: Vec<_> = replayed.iter().map(|e| e.id).collect();
        assert_eq!(replayed_ids, ids);
    }
}
