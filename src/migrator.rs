//! Moves messages off an inactive queue instance so the cluster can route
//! them to an instance that has consumers.
//!
//! Messages are taken and re-put under syncpoint with their full original
//! context, committing every `batch_size` messages. If the cluster routes a
//! re-put back to the local queue manager there is no better instance right
//! now: the open batch is backed out and the job halts until the next poll.

use crate::client::{
    get_with_resize, ClientError, GetOptions, ObjectHandle, OpenOptions, PutOptions, QueueClient,
};
use crate::context::StopSignal;
use std::fmt;

pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// A bounded migration pass over one queue. The ceiling is fixed when the job
/// is created, so messages arriving meanwhile wait for the next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationJob {
    pub queue: String,
    pub ceiling: u32,
}

impl MigrationJob {
    pub fn new(queue: impl Into<String>, depth: i32, cap: Option<u32>) -> Self {
        let depth = depth.max(0) as u32;
        Self {
            queue: queue.into(),
            ceiling: cap.map_or(depth, |cap| depth.min(cap)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub local_queue_manager: String,
    pub batch_size: u32,
    pub buffer_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Every available message up to the ceiling was moved.
    Completed { migrated: u32 },
    /// A re-put resolved to the local queue manager.
    Halted { migrated: u32 },
    /// The stop signal was raised mid-job.
    Stopped { migrated: u32 },
    Failed {
        migrated: u32,
        operation: &'static str,
        error: ClientError,
    },
}

impl MigrationOutcome {
    /// Messages committed to their new destination.
    pub fn migrated(&self) -> u32 {
        match self {
            MigrationOutcome::Completed { migrated }
            | MigrationOutcome::Halted { migrated }
            | MigrationOutcome::Stopped { migrated }
            | MigrationOutcome::Failed { migrated, .. } => *migrated,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MigrationOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            MigrationOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::Completed { .. } => write!(f, "completed"),
            MigrationOutcome::Halted { .. } => {
                write!(f, "halted, messages resolved to the local instance")
            }
            MigrationOutcome::Stopped { .. } => write!(f, "stopped"),
            MigrationOutcome::Failed {
                operation, error, ..
            } => write!(f, "failed, {} returned {}", operation, error),
        }
    }
}

async fn backout<C>(client: &mut C, queue: &str)
where
    C: QueueClient + ?Sized,
{
    if let Err(e) = client.backout().await {
        log::error!("Backout after migrating from {} failed: {}", queue, e);
    }
}

async fn close<C>(client: &mut C, handle: ObjectHandle, queue: &str)
where
    C: QueueClient + ?Sized,
{
    if let Err(e) = client.close(handle).await {
        log::warn!("Closing {} after migration failed: {}", queue, e);
    }
}

/// Runs one migration job. Never fails outright: the outcome reports how far
/// the job got.
pub async fn migrate<C>(
    client: &mut C,
    job: &MigrationJob,
    settings: &MigrationSettings,
    stop: &StopSignal,
) -> MigrationOutcome
where
    C: QueueClient + ?Sized,
{
    let input = match client.open(&job.queue, OpenOptions::context_saving_input()).await {
        Ok(handle) => handle,
        Err(error) => {
            return MigrationOutcome::Failed {
                migrated: 0,
                operation: "open",
                error,
            };
        }
    };
    let output = match client
        .open(&job.queue, OpenOptions::workload_balanced_output())
        .await
    {
        Ok(handle) => handle,
        Err(error) => {
            close(client, input, &job.queue).await;
            return MigrationOutcome::Failed {
                migrated: 0,
                operation: "open",
                error,
            };
        }
    };

    let outcome = transfer(client, job, settings, stop, input, output).await;

    close(client, output, &job.queue).await;
    close(client, input, &job.queue).await;
    outcome
}

async fn transfer<C>(
    client: &mut C,
    job: &MigrationJob,
    settings: &MigrationSettings,
    stop: &StopSignal,
    input: ObjectHandle,
    output: ObjectHandle,
) -> MigrationOutcome
where
    C: QueueClient + ?Sized,
{
    let batch_size = settings.batch_size.max(1);
    let mut buffer_len = settings.buffer_len;
    let mut committed = 0u32;
    let mut uncommitted = 0u32;

    let get_options = GetOptions::no_wait().under_syncpoint();
    let put_options = PutOptions {
        syncpoint: true,
        pass_context_from: Some(input),
        ..PutOptions::default()
    };

    for _ in 0..job.ceiling {
        if stop.is_raised() {
            backout(client, &job.queue).await;
            return MigrationOutcome::Stopped {
                migrated: committed,
            };
        }

        let message = match get_with_resize(client, input, &get_options, &mut buffer_len).await {
            Ok(message) => message,
            Err(e) if e.is_no_message() => break,
            Err(error) => {
                backout(client, &job.queue).await;
                return MigrationOutcome::Failed {
                    migrated: committed,
                    operation: "get",
                    error,
                };
            }
        };

        let resolved = match client.put(output, &message, &put_options).await {
            Ok(outcome) => outcome.resolved_queue_manager,
            Err(error) => {
                backout(client, &job.queue).await;
                return MigrationOutcome::Failed {
                    migrated: committed,
                    operation: "put",
                    error,
                };
            }
        };

        if resolved == settings.local_queue_manager {
            log::info!(
                "Message from {} resolved back to {}, halting migration",
                job.queue,
                resolved
            );
            backout(client, &job.queue).await;
            return MigrationOutcome::Halted {
                migrated: committed,
            };
        }
        log::trace!("Re-put message from {} to {}", job.queue, resolved);

        uncommitted += 1;
        if uncommitted == batch_size {
            if let Err(error) = client.commit().await {
                backout(client, &job.queue).await;
                return MigrationOutcome::Failed {
                    migrated: committed,
                    operation: "commit",
                    error,
                };
            }
            committed += uncommitted;
            uncommitted = 0;
            log::debug!("Committed {} migrated messages from {}", committed, job.queue);
        }
    }

    if uncommitted > 0 {
        if let Err(error) = client.commit().await {
            backout(client, &job.queue).await;
            return MigrationOutcome::Failed {
                migrated: committed,
                operation: "commit",
                error,
            };
        }
        committed += uncommitted;
    }

    MigrationOutcome::Completed {
        migrated: committed,
    }
}
