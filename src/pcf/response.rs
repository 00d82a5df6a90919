use super::{param, PcfError, PcfMessage, UseQueuePolicy};
use crate::client::{CompletionCode, Reason};

/// Outcome carried in a response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    /// No object matched the name or mask.
    NotFound,
    /// The command server refused the command.
    Rejected,
    Failed,
}

impl PcfMessage {
    pub fn completion(&self) -> CompletionCode {
        CompletionCode::from_raw(self.header.completion)
    }

    pub fn reason(&self) -> Reason {
        Reason(self.header.reason)
    }

    pub fn status(&self) -> ResponseStatus {
        if self.completion() == CompletionCode::Ok {
            return ResponseStatus::Ok;
        }
        match self.reason() {
            Reason::UNKNOWN_OBJECT_NAME => ResponseStatus::NotFound,
            Reason::COMMAND_FAILED => ResponseStatus::Rejected,
            _ => ResponseStatus::Failed,
        }
    }
}

fn required_integer(message: &PcfMessage, id: i32) -> Result<i32, PcfError> {
    message.integer(id).ok_or(PcfError::MissingParameter(id))
}

fn required_string(message: &PcfMessage, id: i32) -> Result<String, PcfError> {
    message
        .string(id)
        .map(str::to_string)
        .ok_or(PcfError::MissingParameter(id))
}

/// Attributes of one local queue at the time of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub name: String,
    pub cluster: String,
    pub open_input_count: i32,
    pub priority: i32,
    /// `None` when the queue reports a value this monitor does not know.
    pub use_queue: Option<UseQueuePolicy>,
    pub depth: i32,
}

impl TryFrom<&PcfMessage> for QueueSnapshot {
    type Error = PcfError;

    fn try_from(message: &PcfMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            name: required_string(message, param::Q_NAME)?,
            cluster: message.string(param::CLUSTER_NAME).unwrap_or_default().to_string(),
            open_input_count: required_integer(message, param::OPEN_INPUT_COUNT)?,
            priority: required_integer(message, param::CLWL_Q_PRIORITY)?,
            use_queue: UseQueuePolicy::from_raw(required_integer(message, param::CLWL_USEQ)?),
            depth: required_integer(message, param::CURRENT_Q_DEPTH)?,
        })
    }
}

/// One instance of a queue name somewhere in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInstance {
    pub owner: String,
    pub priority: i32,
}

impl TryFrom<&PcfMessage> for ClusterInstance {
    type Error = PcfError;

    fn try_from(message: &PcfMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            owner: required_string(message, param::CLUSTER_Q_MGR_NAME)?,
            priority: required_integer(message, param::CLWL_Q_PRIORITY)?,
        })
    }
}
