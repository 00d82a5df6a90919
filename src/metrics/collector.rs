use crate::metrics::snapshot::StatisticsSnapshot;
use chrono::Utc;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::time::Instant;

/// Interval statistics for the control loop.
///
/// Only the control loop records into it; the counters are atomics so a
/// progress display can take snapshots from another task.
#[derive(Clone)]
pub struct MetricsCollector {
    polls: Arc<AtomicU64>,
    queues_checked: Arc<AtomicU64>,
    state_changes: Arc<AtomicU64>,
    migration_jobs: Arc<AtomicU64>,
    messages_migrated: Arc<AtomicU64>,
    min_poll_ms: Arc<AtomicU64>,
    max_poll_ms: Arc<AtomicU64>,
    total_poll_ms: Arc<AtomicU64>,
    window_started_ms: Arc<AtomicU64>,
    origin: Arc<Instant>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            polls: Arc::new(AtomicU64::new(0)),
            queues_checked: Arc::new(AtomicU64::new(0)),
            state_changes: Arc::new(AtomicU64::new(0)),
            migration_jobs: Arc::new(AtomicU64::new(0)),
            messages_migrated: Arc::new(AtomicU64::new(0)),
            min_poll_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_poll_ms: Arc::new(AtomicU64::new(0)),
            total_poll_ms: Arc::new(AtomicU64::new(0)),
            window_started_ms: Arc::new(AtomicU64::new(0)),
            origin: Arc::new(Instant::now()),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn increment_queues_checked(&self) {
        self.queues_checked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_state_changes(&self) {
        self.state_changes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_migration(&self, migrated: u32) {
        self.migration_jobs.fetch_add(1, Ordering::SeqCst);
        self.messages_migrated
            .fetch_add(u64::from(migrated), Ordering::SeqCst);
    }

    pub fn record_poll(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.total_poll_ms.fetch_add(ms, Ordering::SeqCst);
        self.min_poll_ms.fetch_min(ms, Ordering::SeqCst);
        self.max_poll_ms.fetch_max(ms, Ordering::SeqCst);
    }

    pub fn polls_in_window(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn window_elapsed(&self) -> Duration {
        let started = self.window_started_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(started))
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let polls = self.polls.load(Ordering::SeqCst);
        let total_poll_ms = self.total_poll_ms.load(Ordering::SeqCst);
        let min_poll_ms = match self.min_poll_ms.load(Ordering::SeqCst) {
            u64::MAX => 0,
            ms => ms,
        };

        StatisticsSnapshot {
            recorded_at: Utc::now(),
            window_seconds: self.window_elapsed().as_secs_f64(),
            polls,
            queues_checked: self.queues_checked.load(Ordering::SeqCst),
            state_changes: self.state_changes.load(Ordering::SeqCst),
            migration_jobs: self.migration_jobs.load(Ordering::SeqCst),
            messages_migrated: self.messages_migrated.load(Ordering::SeqCst),
            min_poll_ms,
            max_poll_ms: self.max_poll_ms.load(Ordering::SeqCst),
            avg_poll_ms: if polls > 0 { total_poll_ms / polls } else { 0 },
            total_poll_ms,
        }
    }

    /// Takes a snapshot of the current window and starts a new one.
    pub fn take_window(&self) -> StatisticsSnapshot {
        let snapshot = self.snapshot();
        self.polls.store(0, Ordering::SeqCst);
        self.queues_checked.store(0, Ordering::SeqCst);
        self.state_changes.store(0, Ordering::SeqCst);
        self.migration_jobs.store(0, Ordering::SeqCst);
        self.messages_migrated.store(0, Ordering::SeqCst);
        self.min_poll_ms.store(u64::MAX, Ordering::SeqCst);
        self.max_poll_ms.store(0, Ordering::SeqCst);
        self.total_poll_ms.store(0, Ordering::SeqCst);
        self.window_started_ms.store(self.now_ms(), Ordering::SeqCst);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_durations_track_min_max_and_average() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.snapshot().min_poll_ms, 0);

        metrics.record_poll(Duration::from_millis(30));
        metrics.record_poll(Duration::from_millis(10));
        metrics.record_poll(Duration::from_millis(50));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.polls, 3);
        assert_eq!(snapshot.min_poll_ms, 10);
        assert_eq!(snapshot.max_poll_ms, 50);
        assert_eq!(snapshot.avg_poll_ms, 30);
        assert_eq!(snapshot.total_poll_ms, 90);
    }

    #[test]
    fn take_window_resets_counters() {
        let metrics = MetricsCollector::new();
        metrics.increment_queues_checked();
        metrics.increment_state_changes();
        metrics.record_migration(20);
        metrics.record_migration(5);
        metrics.record_poll(Duration::from_millis(7));

        let window = metrics.take_window();
        assert_eq!(window.queues_checked, 1);
        assert_eq!(window.state_changes, 1);
        assert_eq!(window.migration_jobs, 2);
        assert_eq!(window.messages_migrated, 25);

        let fresh = metrics.snapshot();
        assert_eq!(fresh.polls, 0);
        assert_eq!(fresh.messages_migrated, 0);
        assert_eq!(fresh.min_poll_ms, 0);
        assert_eq!(fresh.max_poll_ms, 0);
    }

    #[test]
    fn clones_share_counters() {
        let metrics = MetricsCollector::new();
        let watcher = metrics.clone();
        metrics.increment_queues_checked();
        assert_eq!(watcher.snapshot().queues_checked, 1);
    }
}
