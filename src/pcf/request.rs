use super::{command, param, queue_type, Header, Parameter, PcfMessage};
use crate::classifier::ConfigurationDelta;

/// Attributes the monitor reads from each local queue.
pub const LOCAL_QUEUE_ATTRS: [i32; 6] = [
    param::OPEN_INPUT_COUNT,
    param::CLWL_Q_PRIORITY,
    param::CLWL_USEQ,
    param::CURRENT_Q_DEPTH,
    param::Q_NAME,
    param::CLUSTER_NAME,
];

/// Attributes read from every cluster-wide instance of a queue.
pub const CLUSTER_INSTANCE_ATTRS: [i32; 2] = [param::CLWL_Q_PRIORITY, param::CLUSTER_Q_MGR_NAME];

/// Inquire the local instances of clustered queues matching `mask`.
pub fn inquire_local_queues(mask: &str, cluster: &str) -> PcfMessage {
    PcfMessage::new(Header::command(command::INQUIRE_Q))
        .with(Parameter::string(param::Q_NAME, mask))
        .with(Parameter::integer(param::Q_TYPE, queue_type::LOCAL))
        .with(Parameter::string(param::CLUSTER_NAME, cluster))
        .with(Parameter::integer_list(param::Q_ATTRS, LOCAL_QUEUE_ATTRS))
}

/// Change a local queue. Only the fields present in `delta` are sent, so
/// absent fields are left as they are on the queue manager.
pub fn change_queue(queue: &str, delta: &ConfigurationDelta) -> PcfMessage {
    let mut request = PcfMessage::new(Header::command(command::CHANGE_Q))
        .with(Parameter::string(param::Q_NAME, queue))
        .with(Parameter::integer(param::Q_TYPE, queue_type::LOCAL));
    if let Some(priority) = delta.priority {
        request = request.with(Parameter::integer(param::CLWL_Q_PRIORITY, priority));
    }
    if let Some(policy) = delta.use_queue {
        request = request.with(Parameter::integer(param::CLWL_USEQ, policy.as_raw()));
    }
    request
}

/// Inquire every instance of `queue` known to the cluster.
pub fn inquire_cluster_instances(queue: &str) -> PcfMessage {
    PcfMessage::new(Header::command(command::INQUIRE_Q))
        .with(Parameter::string(param::Q_NAME, queue))
        .with(Parameter::integer(param::Q_TYPE, queue_type::CLUSTER))
        .with(Parameter::integer_list(param::Q_ATTRS, CLUSTER_INSTANCE_ATTRS))
}
