//! Structured records for everything an operator needs to see in the log.
//!
//! Components build a [`MonitorEvent`] and call [`MonitorEvent::emit`]; the
//! `Display` impl is the only place that decides how an event reads.

use crate::classifier::{ConfigurationDelta, QueueActivityState};
use crate::client::{CompletionCode, Reason};
use crate::context::StopReason;
use crate::metrics::StatisticsSnapshot;
use crate::migrator::MigrationOutcome;
use log::Level;
use std::fmt;

pub const EVENT_TARGET: &str = "clusmon::event";

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Connected {
        queue_manager: String,
    },
    ResourceUnavailable {
        queue: String,
        reason: Reason,
    },
    ResourceAcquired {
        queue: String,
    },
    StateTransition {
        queue: String,
        state: QueueActivityState,
        open_input_count: i32,
        priority: i32,
    },
    ConfigurationChanged {
        queue: String,
        delta: ConfigurationDelta,
    },
    NoQueuesMatched {
        mask: String,
    },
    NoActiveAlternate {
        queue: String,
        depth: i32,
    },
    MigrationFinished {
        queue: String,
        ceiling: u32,
        outcome: MigrationOutcome,
    },
    OperationFailed {
        operation: &'static str,
        object: String,
        completion: CompletionCode,
        reason: Reason,
    },
    CommandFailed {
        command: &'static str,
        object: String,
        completion: CompletionCode,
        reason: Reason,
    },
    Statistics(StatisticsSnapshot),
    Stopping(StopReason),
}

impl MonitorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Connected { .. } => "connected",
            MonitorEvent::ResourceUnavailable { .. } => "resource_unavailable",
            MonitorEvent::ResourceAcquired { .. } => "resource_acquired",
            MonitorEvent::StateTransition { .. } => "state_transition",
            MonitorEvent::ConfigurationChanged { .. } => "configuration_changed",
            MonitorEvent::NoQueuesMatched { .. } => "no_queues_matched",
            MonitorEvent::NoActiveAlternate { .. } => "no_active_alternate",
            MonitorEvent::MigrationFinished { .. } => "migration_finished",
            MonitorEvent::OperationFailed { .. } => "operation_failed",
            MonitorEvent::CommandFailed { .. } => "command_failed",
            MonitorEvent::Statistics(_) => "statistics",
            MonitorEvent::Stopping(_) => "stopping",
        }
    }

    pub fn level(&self) -> Level {
        match self {
            MonitorEvent::OperationFailed { .. } | MonitorEvent::CommandFailed { .. } => Level::Error,
            MonitorEvent::ResourceUnavailable { .. } => Level::Warn,
            MonitorEvent::Stopping(StopReason::Requested | StopReason::Interrupted) => Level::Info,
            MonitorEvent::Stopping(_) => Level::Error,
            MonitorEvent::MigrationFinished { outcome, .. } if outcome.is_failure() => Level::Warn,
            _ => Level::Info,
        }
    }

    pub fn emit(&self) {
        log::log!(target: EVENT_TARGET, self.level(), "[{}] {}", self.kind(), self);
    }
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorEvent::Connected { queue_manager } => {
                write!(f, "connected to queue manager {}", queue_manager)
            }
            MonitorEvent::ResourceUnavailable { queue, reason } => write!(
                f,
                "cannot open {} (reason {}), polling suspended until it can be opened",
                queue, reason
            ),
            MonitorEvent::ResourceAcquired { queue } => write!(f, "opened {}", queue),
            MonitorEvent::StateTransition {
                queue,
                state,
                open_input_count,
                priority,
            } => write!(
                f,
                "queue {} is {} (IPPROCS={}, CLWLPRTY={})",
                queue, state, open_input_count, priority
            ),
            MonitorEvent::ConfigurationChanged { queue, delta } => {
                write!(f, "queue {} altered: {}", queue, delta)
            }
            MonitorEvent::NoQueuesMatched { mask } => write!(f, "no queues match {}", mask),
            MonitorEvent::NoActiveAlternate { queue, depth } => write!(
                f,
                "queue {} holds {} messages but no other active instance exists",
                queue, depth
            ),
            MonitorEvent::MigrationFinished {
                queue,
                ceiling,
                outcome,
            } => write!(
                f,
                "moved {} of up to {} messages from {} ({})",
                outcome.migrated(),
                ceiling,
                queue,
                outcome
            ),
            MonitorEvent::OperationFailed {
                operation,
                object,
                completion,
                reason,
            } => write!(
                f,
                "{} on {} failed: completion {}, reason {}",
                operation, object, completion, reason
            ),
            MonitorEvent::CommandFailed {
                command,
                object,
                completion,
                reason,
            } => write!(
                f,
                "{} command for {} failed: completion {}, reason {}",
                command, object, completion, reason
            ),
            MonitorEvent::Statistics(snapshot) => write!(
                f,
                "polls={} queues_checked={} state_changes={} migration_jobs={} messages_migrated={} poll_ms(min/avg/max)={}/{}/{}",
                snapshot.polls,
                snapshot.queues_checked,
                snapshot.state_changes,
                snapshot.migration_jobs,
                snapshot.messages_migrated,
                snapshot.min_poll_ms,
                snapshot.avg_poll_ms,
                snapshot.max_poll_ms
            ),
            MonitorEvent::Stopping(reason) => write!(f, "stopping: {}", reason),
        }
    }
}
