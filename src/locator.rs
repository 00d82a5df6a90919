use crate::admin::AdminChannel;
use crate::client::QueueClient;
use crate::error::Result;
use crate::events::MonitorEvent;
use crate::pcf::{self, ClusterInstance, ResponseStatus};

/// Whether an instance other than the local one is advertised as active.
pub fn is_active_alternate(instance: &ClusterInstance, local_queue_manager: &str) -> bool {
    instance.priority > 0 && instance.owner != local_queue_manager
}

/// Looks for another active instance of `queue` in the cluster.
///
/// Every reply to the inquiry is read, even after a match, so nothing is
/// left behind on the reply queue. A failed or empty inquiry counts as "not
/// found"; only errors that stop the monitor are returned.
pub async fn find_active_alternate<C>(
    client: &mut C,
    admin: &mut AdminChannel,
    queue: &str,
    local_queue_manager: &str,
) -> Result<bool>
where
    C: QueueClient + ?Sized,
{
    match scan(client, admin, queue, local_queue_manager).await {
        Ok(found) => Ok(found),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log::warn!("Cluster lookup for {} failed: {}", queue, e);
            Ok(false)
        }
    }
}

async fn scan<C>(
    client: &mut C,
    admin: &mut AdminChannel,
    queue: &str,
    local_queue_manager: &str,
) -> Result<bool>
where
    C: QueueClient + ?Sized,
{
    let request = pcf::inquire_cluster_instances(queue);
    let mut pending = admin.send(client, "inquire cluster queue", queue, &request).await?;

    let mut found = false;
    while let Some(reply) = admin.next_reply(client, &mut pending).await? {
        match reply.status() {
            ResponseStatus::Ok => {}
            ResponseStatus::NotFound => continue,
            _ => {
                MonitorEvent::CommandFailed {
                    command: pending.command(),
                    object: queue.to_string(),
                    completion: reply.completion(),
                    reason: reply.reason(),
                }
                .emit();
                continue;
            }
        }
        match ClusterInstance::try_from(&reply) {
            Ok(instance) => {
                log::debug!(
                    "Instance of {} on {} has priority {}",
                    queue,
                    instance.owner,
                    instance.priority
                );
                if !found && is_active_alternate(&instance, local_queue_manager) {
                    found = true;
                }
            }
            Err(e) => log::warn!("Ignoring cluster reply for {}: {}", queue, e),
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(owner: &str, priority: i32) -> ClusterInstance {
        ClusterInstance {
            owner: owner.to_string(),
            priority,
        }
    }

    #[test]
    fn only_remote_positive_priority_counts() {
        assert!(is_active_alternate(&instance("QM2", 2), "QM1"));
        assert!(!is_active_alternate(&instance("QM1", 5), "QM1"));
        assert!(!is_active_alternate(&instance("QM2", 0), "QM1"));
    }
}
