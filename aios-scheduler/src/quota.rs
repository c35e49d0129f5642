//! Per-action-type rate quota, the second Action Queue guardrail (spec
//! §4.E).

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub per_hour: usize,
    pub per_day: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { per_hour: 100, per_day: 1000 }
    }
}

#[derive(Default)]
pub struct QuotaWindow {
    hourly: VecDeque<DateTime<Utc>>,
    daily: VecDeque<DateTime<Utc>>,
}

impl QuotaWindow {
    fn expire(deque: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        while deque.front().is_some_and(|t| *t < cutoff) {
            deque.pop_front();
        }
    }

    /// `true` if another dispatch is still within quota; records it if so.
    pub fn try_consume(&mut self, config: &QuotaConfig) -> bool {
        let now = Utc::now();
        Self::expire(&mut self.hourly, now, Duration::hours(1));
        Self::expire(&mut self.daily, now, Duration::days(1));
        if self.hourly.len() >= config.per_hour || self.daily.len() >= config.per_day {
            return false;
        }
        self.hourly.push_back(now);
        self.daily.push_back(now);
        true
    }
}
