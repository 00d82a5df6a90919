use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One measurement window of control-loop statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub recorded_at: DateTime<Utc>,
    pub window_seconds: f64,
    pub polls: u64,
    pub queues_checked: u64,
    pub state_changes: u64,
    pub migration_jobs: u64,
    pub messages_migrated: u64,
    pub min_poll_ms: u64,
    pub max_poll_ms: u64,
    pub avg_poll_ms: u64,
    pub total_poll_ms: u64,
}
