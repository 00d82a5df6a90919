use crate::client::NAME_LENGTH;
use crate::pcf::UseQueuePolicy;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_queue_source"))]
pub struct MonitorConfig {
    /// Queue manager to connect to; empty selects the default one.
    #[serde(default)]
    #[validate(length(max = 48))]
    pub queue_manager: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 48))]
    pub cluster: String,

    /// Queue names or masks with a trailing `*`.
    #[serde(default)]
    #[validate(custom = "validate_queue_masks")]
    pub queues: Vec<String>,

    /// File with one queue name or mask per line.
    #[serde(default)]
    pub queue_file: Option<String>,

    #[serde(default = "default_admin_queue")]
    #[validate(length(min = 1, max = 48))]
    pub admin_queue: String,

    /// Receives command replies and stop requests; opened exclusively.
    #[serde(default = "default_control_queue")]
    #[validate(length(min = 1, max = 48))]
    pub control_queue: String,

    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_reply_wait")]
    #[validate(range(min = 1))]
    pub reply_wait_ms: u64,

    #[serde(default = "default_stats_interval")]
    #[validate(range(min = 1))]
    pub stats_interval_secs: u64,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub stats_every_polls: Option<u64>,

    /// Flush statistics after every pass.
    #[serde(default)]
    pub diagnostics: bool,

    #[serde(default = "default_true")]
    pub migrate: bool,

    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: u32,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_migrate_per_pass: Option<u32>,

    #[serde(default = "default_active_priority")]
    #[validate(range(min = 1, max = 9))]
    pub active_priority: i32,

    #[serde(default)]
    pub switch_use_queue: bool,

    #[serde(default = "default_preferred_use_queue")]
    pub preferred_use_queue: UseQueuePolicy,

    #[serde(default = "default_buffer_size")]
    #[validate(range(min = 64))]
    pub buffer_size: usize,

    #[serde(default)]
    pub output: Option<OutputConfig>,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    Console,
    Json {
        path: String,
    },
    Csv {
        path: String,
    },
    Sqlite {
        path: String,
        #[serde(default = "default_table_name")]
        table: String,
    },
}

fn validate_queue_masks(queues: &[String]) -> Result<(), ValidationError> {
    for queue in queues {
        validate_queue_mask(queue)?;
    }
    Ok(())
}

pub(crate) fn validate_queue_mask(queue: &str) -> Result<(), ValidationError> {
    if queue.is_empty() || queue.len() > NAME_LENGTH {
        return Err(ValidationError::new("queue_name_length"));
    }
    if queue.trim_end_matches('*').contains('*') {
        return Err(ValidationError::new("wildcard_not_trailing"));
    }
    Ok(())
}

fn validate_queue_source(config: &MonitorConfig) -> Result<(), ValidationError> {
    if config.queues.is_empty() && config.queue_file.is_none() {
        return Err(ValidationError::new("no_queues_configured"));
    }
    Ok(())
}

fn default_admin_queue() -> String {
    "SYSTEM.ADMIN.COMMAND.QUEUE".to_string()
}

fn default_control_queue() -> String {
    "SYSTEM.CLUSTER.MONITOR.QUEUE".to_string()
}

pub(crate) fn default_poll_interval() -> u64 {
    300
}

pub(crate) fn default_initial_delay() -> u64 {
    30
}

pub(crate) fn default_reply_wait() -> u64 {
    10_000
}

pub(crate) fn default_stats_interval() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_batch_size() -> u32 {
    50
}

pub(crate) fn default_active_priority() -> i32 {
    1
}

pub(crate) fn default_preferred_use_queue() -> UseQueuePolicy {
    UseQueuePolicy::Local
}

pub(crate) fn default_buffer_size() -> usize {
    4096
}

fn default_table_name() -> String {
    "monitor_statistics".to_string()
}
