// SPDX-License-Identifier: GPL-3.0-only

//! Duplicate scan suppression
//!
//! A code is accepted when it has never been seen, or when at least one
//! cooldown has passed since it was last *accepted*. Rejected repeats do not
//! extend the window, so holding a badge in front of the camera produces one
//! event per cooldown rather than one event ever.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Last acceptance of one code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceEntry {
    pub code: String,
    pub last_accepted_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ScanEventDebouncer {
    cooldown: Duration,
    prune_factor: u32,
    entries: HashMap<String, Instant>,
    last_prune: Option<Instant>,
}

impl Default for ScanEventDebouncer {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_COOLDOWN,
            crate::constants::DEFAULT_PRUNE_FACTOR,
        )
    }
}

impl ScanEventDebouncer {
    /// `prune_factor` of 0 is treated as 1
    pub fn new(cooldown: Duration, prune_factor: u32) -> Self {
        Self {
            cooldown,
            prune_factor: prune_factor.max(1),
            entries: HashMap::new(),
            last_prune: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether `code`, seen at `now`, should be forwarded
    pub fn accept(&mut self, code: &str, now: Instant) -> bool {
        self.maybe_prune(now);

        if let Some(last) = self.entries.get(code) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.cooldown {
                trace!(code, elapsed_ms = elapsed.as_millis() as u64, "Duplicate scan suppressed");
                return false;
            }
        }

        self.entries.insert(code.to_string(), now);
        debug!(code, "Scan accepted");
        true
    }

    /// Drop entries older than `prune_factor × cooldown`, at most once per cooldown
    fn maybe_prune(&mut self, now: Instant) {
        if self
            .last_prune
            .is_some_and(|t| now.saturating_duration_since(t) < self.cooldown)
        {
            return;
        }
        self.last_prune = Some(now);

        let max_age = self
            .cooldown
            .checked_mul(self.prune_factor)
            .unwrap_or(Duration::MAX);
        let before = self.entries.len();
        self.entries
            .retain(|_, last| now.saturating_duration_since(*last) <= max_age);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            trace!(pruned, remaining = self.entries.len(), "Pruned debounce entries");
        }
    }

    /// Entry for `code`, if it is remembered
    pub fn entry(&self, code: &str) -> Option<DebounceEntry> {
        self.entries.get(code).map(|&last| DebounceEntry {
            code: code.to_string(),
            last_accepted_at: last,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every code
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_prune = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_first_sighting_accepted() {
        let mut debouncer = ScanEventDebouncer::new(ms(2000), 5);
        let t0 = Instant::now();
        assert!(debouncer.accept("A", t0));
        assert!(debouncer.accept("B", t0));
        assert_eq!(debouncer.len(), 2);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let mut debouncer = ScanEventDebouncer::new(ms(2000), 5);
        let t0 = Instant::now();
        assert!(debouncer.accept("A", t0));
        assert!(!debouncer.accept("A", t0 + ms(1999)));
        assert!(debouncer.accept("A", t0 + ms(2000)));
    }

    #[test]
    fn test_rejection_does_not_refresh() {
        let mut debouncer = ScanEventDebouncer::new(ms(2000), 5);
        let t0 = Instant::now();
        assert!(debouncer.accept("A", t0));
        assert!(!debouncer.accept("A", t0 + ms(1500)));
        // Measured from the acceptance at t0, not the rejection at 1500
        assert!(debouncer.accept("A", t0 + ms(2100)));
        assert_eq!(debouncer.entry("A").unwrap().last_accepted_at, t0 + ms(2100));
    }

    #[test]
    fn test_old_entries_pruned() {
        let mut debouncer = ScanEventDebouncer::new(ms(100), 5);
        let t0 = Instant::now();
        debouncer.accept("OLD", t0);
        debouncer.accept("NEWER", t0 + ms(400));
        // OLD is 600ms old (> 5 × 100ms); NEWER is 200ms old
        debouncer.accept("TRIGGER", t0 + ms(600));
        assert!(debouncer.entry("OLD").is_none());
        assert!(debouncer.entry("NEWER").is_some());
        assert_eq!(debouncer.len(), 2);
    }

    #[test]
    fn test_prune_runs_at_most_once_per_cooldown() {
        let mut debouncer = ScanEventDebouncer::new(ms(100), 1);
        let t0 = Instant::now();
        debouncer.accept("A", t0); // prune pass at t0
        debouncer.accept("B", t0 + ms(100)); // prune pass, A is exactly 100ms old and kept
        assert!(debouncer.entry("A").is_some());

        // A is now 150ms old, but the last pass was only 50ms ago
        debouncer.accept("C", t0 + ms(150));
        assert!(debouncer.entry("A").is_some());

        debouncer.accept("D", t0 + ms(200));
        assert!(debouncer.entry("A").is_none());
        assert!(debouncer.entry("B").is_some());
    }

    #[test]
    fn test_clear() {
        let mut debouncer = ScanEventDebouncer::default();
        let t0 = Instant::now();
        debouncer.accept("A", t0);
        debouncer.clear();
        assert!(debouncer.is_empty());
        assert!(debouncer.accept("A", t0 + ms(1)));
    }

    #[test]
    fn test_huge_prune_window_keeps_entries() {
        let mut debouncer = ScanEventDebouncer::new(Duration::from_secs(u64::MAX / 2), u32::MAX);
        let t0 = Instant::now();
        assert!(debouncer.accept("A", t0));
        assert!(debouncer.accept("B", t0 + ms(1)));
        assert!(!debouncer.accept("A", t0 + ms(2)));
        assert_eq!(debouncer.len(), 2);
    }
}
