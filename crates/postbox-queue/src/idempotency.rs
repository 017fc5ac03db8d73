// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory TTL set of recently seen keys.
//!
//! The router keys this by `{channel}:{external_id}` so a message re-polled
//! after a restart or cursor hiccup is enqueued at most once per window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
pub struct IdempotencyTracker {
    ttl: Duration,
    seen: HashMap<String, Instant>,
}

impl Default for IdempotencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl IdempotencyTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
        }
    }

    /// Record `key`. Returns `false` if it was already seen inside the window.
    pub fn check_and_record(&mut self, key: &str) -> bool {
        self.check_and_record_at(key, Instant::now())
    }

    fn check_and_record_at(&mut self, key: &str, now: Instant) -> bool {
        self.evict(now);
        match self.seen.get(key) {
            Some(_) => false,
            None => {
                self.seen.insert(key.to_string(), now);
                true
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen
            .get(key)
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_inside_window_is_rejected() {
        let mut tracker = IdempotencyTracker::default();
        assert!(tracker.check_and_record("telegram:1"));
        assert!(!tracker.check_and_record("telegram:1"));
        assert!(tracker.check_and_record("telegram:2"));
        assert!(tracker.contains("telegram:1"));
    }

    #[test]
    fn keys_expire_after_ttl() {
        let mut tracker = IdempotencyTracker::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(tracker.check_and_record_at("k", start));
        assert!(!tracker.check_and_record_at("k", start + Duration::from_secs(5)));
        assert!(tracker.check_and_record_at("k", start + Duration::from_secs(11)));
        assert_eq!(tracker.len(), 1);
    }
}
