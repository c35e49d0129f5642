//! Global fuse (spec §4.D Reactor variant): a single top-level counter of
//! consecutive action failures that, once tripped, blocks all Reactor
//! execution until explicitly reset.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct GlobalFuse {
    threshold: u32,
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
}

impl GlobalFuse {
    pub fn new(threshold: u32) -> Self {
        Self { threshold: threshold.max(1), consecutive_failures: AtomicU32::new(0), tripped: AtomicBool::new(false) }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Reset the streak on a successful action.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a failed action. Returns `true` if this call tripped the
    /// fuse (the streak just crossed `threshold`).
    pub fn record_failure(&self) -> bool {
        let count = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.threshold && !self.tripped.swap(true, Ordering::SeqCst) {
            return true;
        }
        false
    }

    /// Externally reset the fuse - via a `reactor.fuse.reset` event or CLI
    /// signal (spec §4.D).
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.tripped.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let fuse = GlobalFuse::new(3);
        assert!(!fuse.record_failure());
        assert!(!fuse.record_failure());
        assert!(fuse.record_failure());
        assert!(fuse.is_tripped());
    }

    #[test]
    fn success_resets_the_streak() {
        let fuse = GlobalFuse::new(3);
        fuse.record_failure();
        fuse.record_failure();
        fuse.record_success();
        assert!(!fuse.record_failure());
        assert!(!fuse.is_tripped());
    }

    #[test]
    fn reset_clears_tripped_state() {
        let fuse = GlobalFuse::new(1);
        fuse.record_failure();
        assert!(fuse.is_tripped());
        fuse.reset();
        assert!(!fuse.is_tripped());
    }
}
