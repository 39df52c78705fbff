//! # liveness
//!
//! Per-source heartbeat statistics and staleness.
//!
//! Entries are created on the first heartbeat from a source and never
//! removed. Panels represent "went silent" through [`LivenessTracker::is_stale`],
//! not through absence.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::notify::{Notification, Notifier};
use crate::state::{now_ms, SharedLiveness};

/// Number of recent inter-arrival intervals kept per source.
pub const INTERVAL_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStat {
    pub source_id: String,
    pub count: u64,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    /// Most recent inter-arrival intervals, oldest first
    pub intervals_ms: VecDeque<u64>,
}

impl HeartbeatStat {
    fn new(source_id: &str, timestamp_ms: u64) -> Self {
        Self {
            source_id: source_id.to_string(),
            count: 1,
            first_seen_ms: timestamp_ms,
            last_seen_ms: timestamp_ms,
            intervals_ms: VecDeque::with_capacity(INTERVAL_WINDOW),
        }
    }

    fn observe(&mut self, timestamp_ms: u64) {
        if self.intervals_ms.len() == INTERVAL_WINDOW {
            self.intervals_ms.pop_front();
        }
        // out-of-order arrival counts as a zero interval
        self.intervals_ms
            .push_back(timestamp_ms.saturating_sub(self.last_seen_ms));
        self.last_seen_ms = self.last_seen_ms.max(timestamp_ms);
        self.count += 1;
    }

    pub fn mean_interval_ms(&self) -> Option<f64> {
        if self.intervals_ms.is_empty() {
            return None;
        }
        let sum: u64 = self.intervals_ms.iter().sum();
        Some(sum as f64 / self.intervals_ms.len() as f64)
    }
}

#[derive(Debug, Default)]
pub struct LivenessTracker {
    sources: HashMap<String, HeartbeatStat>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source_id: &str, timestamp_ms: u64) -> &HeartbeatStat {
        self.sources
            .entry(source_id.to_string())
            .and_modify(|stat| stat.observe(timestamp_ms))
            .or_insert_with(|| HeartbeatStat::new(source_id, timestamp_ms))
    }

    /// True if the source was never seen or its last heartbeat is older than
    /// `threshold_ms`.
    pub fn is_stale(&self, source_id: &str, now_ms: u64, threshold_ms: u64) -> bool {
        match self.sources.get(source_id) {
            Some(stat) => now_ms.saturating_sub(stat.last_seen_ms) > threshold_ms,
            None => true,
        }
    }

    /// Copy of every stat, sorted by source id.
    pub fn snapshot(&self) -> Vec<HeartbeatStat> {
        let mut stats: Vec<_> = self.sources.values().cloned().collect();
        stats.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        stats
    }

    pub fn stale_sources(&self, now_ms: u64, threshold_ms: u64) -> Vec<(String, u64)> {
        self.sources
            .values()
            .filter(|stat| now_ms.saturating_sub(stat.last_seen_ms) > threshold_ms)
            .map(|stat| (stat.source_id.clone(), stat.last_seen_ms))
            .collect()
    }
}

// ── Staleness Monitor ─────────────────────────────────────────────────────────

/// Tracks which sources were stale on the previous check so that only
/// transitions are reported.
#[derive(Debug, Default)]
pub struct StalenessMonitor {
    stale: HashSet<String>,
}

impl StalenessMonitor {
    pub fn check(&mut self, tracker: &LivenessTracker, now_ms: u64, threshold_ms: u64) -> Vec<Notification> {
        let mut notifications = Vec::new();
        let currently_stale: HashMap<String, u64> =
            tracker.stale_sources(now_ms, threshold_ms).into_iter().collect();

        for (source_id, last_seen_ms) in &currently_stale {
            if self.stale.insert(source_id.clone()) {
                warn!("Liveness: {source_id} went silent (last seen {last_seen_ms})");
                notifications.push(Notification::SourceStale {
                    source_id: source_id.clone(),
                    last_seen_ms: *last_seen_ms,
                });
            }
        }

        let recovered: Vec<String> = self
            .stale
            .iter()
            .filter(|id| !currently_stale.contains_key(*id))
            .cloned()
            .collect();
        for source_id in recovered {
            self.stale.remove(&source_id);
            info!("Liveness: {source_id} recovered");
            notifications.push(Notification::SourceRecovered { source_id });
        }

        notifications
    }
}

pub async fn run_staleness_monitor(
    liveness: SharedLiveness,
    notifier: Notifier,
    threshold_ms: u64,
    check_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(check_interval);
    let mut monitor = StalenessMonitor::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let notifications = {
            let tracker = liveness.read().await;
            monitor.check(&tracker, now_ms(), threshold_ms)
        };
        for n in notifications {
            notifier.publish(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_seen_is_stale() {
        let tracker = LivenessTracker::new();
        assert!(tracker.is_stale("SIM-1", 0, 1_000));
        assert!(tracker.is_stale("SIM-1", u64::MAX, u64::MAX));
    }

    #[test]
    fn test_fresh_record_is_not_stale() {
        let mut tracker = LivenessTracker::new();
        tracker.record("SIM-1", 5_000);
        assert!(!tracker.is_stale("SIM-1", 5_000, 0));
        assert!(!tracker.is_stale("SIM-1", 6_000, 1_000));
        assert!(tracker.is_stale("SIM-1", 6_001, 1_000));
    }

    #[test]
    fn test_first_record_has_no_interval() {
        let mut tracker = LivenessTracker::new();
        let stat = tracker.record("SIM-1", 100);
        assert_eq!(stat.count, 1);
        assert_eq!(stat.first_seen_ms, 100);
        assert!(stat.intervals_ms.is_empty());
        assert_eq!(stat.mean_interval_ms(), None);
    }

    #[test]
    fn test_intervals_and_counts() {
        let mut tracker = LivenessTracker::new();
        tracker.record("SIM-1", 1_000);
        tracker.record("SIM-1", 1_500);
        let stat = tracker.record("SIM-1", 2_500).clone();

        assert_eq!(stat.count, 3);
        assert_eq!(stat.first_seen_ms, 1_000);
        assert_eq!(stat.last_seen_ms, 2_500);
        assert_eq!(stat.intervals_ms, VecDeque::from(vec![500, 1_000]));
        assert_eq!(stat.mean_interval_ms(), Some(750.0));
    }

    #[test]
    fn test_interval_window_drops_oldest() {
        let mut tracker = LivenessTracker::new();
        for i in 0..=(INTERVAL_WINDOW as u64 + 2) {
            tracker.record("SIM-1", i * i);
        }
        let stat = &tracker.snapshot()[0];
        assert_eq!(stat.intervals_ms.len(), INTERVAL_WINDOW);
        // intervals are 2i-1; the first two (1, 3) have been dropped
        assert_eq!(stat.intervals_ms.front(), Some(&5));
        assert_eq!(stat.intervals_ms.back(), Some(&23));
        assert_eq!(stat.count, INTERVAL_WINDOW as u64 + 3);
    }

    #[test]
    fn test_out_of_order_heartbeat_does_not_rewind() {
        let mut tracker = LivenessTracker::new();
        tracker.record("SIM-1", 2_000);
        let stat = tracker.record("SIM-1", 1_500);
        assert_eq!(stat.last_seen_ms, 2_000);
        assert_eq!(stat.intervals_ms.back(), Some(&0));
    }

    #[test]
    fn test_monitor_reports_transitions_once() {
        let mut tracker = LivenessTracker::new();
        let mut monitor = StalenessMonitor::default();
        tracker.record("SIM-1", 0);

        assert!(monitor.check(&tracker, 500, 1_000).is_empty());

        let went_stale = monitor.check(&tracker, 2_000, 1_000);
        assert_eq!(went_stale.len(), 1);
        assert!(matches!(&went_stale[0], Notification::SourceStale { source_id, last_seen_ms: 0 } if source_id == "SIM-1"));

        assert!(monitor.check(&tracker, 3_000, 1_000).is_empty());

        tracker.record("SIM-1", 3_100);
        let recovered = monitor.check(&tracker, 3_200, 1_000);
        assert_eq!(recovered.len(), 1);
        assert!(matches!(&recovered[0], Notification::SourceRecovered { source_id } if source_id == "SIM-1"));
    }
}
