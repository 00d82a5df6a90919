//! Administrative command format.
//!
//! Layout (all fields little-endian i32):
//!
//! Header (36 bytes):
//! [Type] [StrucLength] [Version] [Command] [MsgSeqNumber] [Control] [CompCode] [Reason] [ParameterCount]
//!
//! Integer parameter (16 bytes):
//! [Type=3] [StrucLength=16] [Parameter] [Value]
//!
//! String parameter (20 bytes + string, padded to a multiple of 4):
//! [Type=4] [StrucLength] [Parameter] [CodedCharSetId] [StringLength] [String...]
//!
//! Integer list parameter (16 bytes + 4 per value):
//! [Type=5] [StrucLength] [Parameter] [Count] [Values...]
//!
//! Every parameter starts with its type and its own length, so a reader can
//! step over types it does not understand.

pub mod codec;
pub mod request;
pub mod response;

use thiserror::Error;

pub use codec::{decode, encode};
pub use request::{change_queue, inquire_cluster_instances, inquire_local_queues};
pub use response::{ClusterInstance, QueueSnapshot, ResponseStatus};

pub const HEADER_LENGTH: usize = 36;
pub const INTEGER_LENGTH: usize = 16;
pub const STRING_FIXED_LENGTH: usize = 20;
pub const INTEGER_LIST_FIXED_LENGTH: usize = 16;
pub const VERSION: i32 = 1;
pub const CCSID_UTF8: i32 = 1208;

/// Requests larger than this are refused before they are sent.
pub const MAX_REQUEST_LENGTH: usize = 4096;

pub mod kind {
    pub const COMMAND: i32 = 1;
    pub const RESPONSE: i32 = 2;
    pub const INTEGER: i32 = 3;
    pub const STRING: i32 = 4;
    pub const INTEGER_LIST: i32 = 5;
}

pub mod command {
    pub const CHANGE_Q: i32 = 8;
    pub const INQUIRE_Q: i32 = 13;
}

pub mod param {
    pub const CURRENT_Q_DEPTH: i32 = 3;
    pub const Q_TYPE: i32 = 20;
    pub const OPEN_INPUT_COUNT: i32 = 65;
    pub const CLWL_Q_PRIORITY: i32 = 96;
    pub const CLWL_USEQ: i32 = 98;
    pub const Q_ATTRS: i32 = 1002;
    pub const Q_NAME: i32 = 2016;
    pub const CLUSTER_NAME: i32 = 2029;
    pub const CLUSTER_Q_MGR_NAME: i32 = 2031;
}

pub mod queue_type {
    pub const LOCAL: i32 = 1;
    pub const CLUSTER: i32 = 7;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PcfError {
    #[error("message too short: {needed} bytes needed at offset {offset}, {available} available")]
    Short {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid structure length {length} at offset {offset}")]
    BadLength { offset: usize, length: i32 },

    #[error("not an administrative message (type {0})")]
    NotAdmin(i32),

    #[error("parameter {0} missing from response")]
    MissingParameter(i32),

    #[error("request of {size} bytes exceeds the {limit} byte limit")]
    RequestTooLarge { size: usize, limit: usize },
}

/// Whether messages routed to a clustered queue may go to any instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseQueuePolicy {
    Local,
    Any,
    AsQueueManager,
}

impl UseQueuePolicy {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(UseQueuePolicy::Local),
            1 => Some(UseQueuePolicy::Any),
            -3 => Some(UseQueuePolicy::AsQueueManager),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            UseQueuePolicy::Local => 0,
            UseQueuePolicy::Any => 1,
            UseQueuePolicy::AsQueueManager => -3,
        }
    }
}

impl std::fmt::Display for UseQueuePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UseQueuePolicy::Local => write!(f, "LOCAL"),
            UseQueuePolicy::Any => write!(f, "ANY"),
            UseQueuePolicy::AsQueueManager => write!(f, "QMGR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: i32,
    pub version: i32,
    pub command: i32,
    pub sequence: i32,
    /// Set on the final message of a reply set.
    pub last: bool,
    pub completion: i32,
    pub reason: i32,
    pub parameter_count: i32,
}

impl Header {
    pub fn command(command: i32) -> Self {
        Self {
            kind: kind::COMMAND,
            version: VERSION,
            command,
            sequence: 1,
            last: true,
            completion: 0,
            reason: 0,
            parameter_count: 0,
        }
    }

    pub fn response(command: i32, sequence: i32, last: bool) -> Self {
        Self {
            kind: kind::RESPONSE,
            sequence,
            last,
            ..Self::command(command)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Integer { id: i32, value: i32 },
    String { id: i32, ccsid: i32, value: String },
    IntegerList { id: i32, values: Vec<i32> },
    /// A parameter type this codec does not interpret.
    Unknown { kind: i32, length: usize },
}

impl Parameter {
    pub fn integer(id: i32, value: i32) -> Self {
        Parameter::Integer { id, value }
    }

    pub fn string(id: i32, value: impl Into<String>) -> Self {
        Parameter::String {
            id,
            ccsid: CCSID_UTF8,
            value: value.into(),
        }
    }

    pub fn integer_list(id: i32, values: impl Into<Vec<i32>>) -> Self {
        Parameter::IntegerList {
            id,
            values: values.into(),
        }
    }

    pub fn id(&self) -> Option<i32> {
        match self {
            Parameter::Integer { id, .. }
            | Parameter::String { id, .. }
            | Parameter::IntegerList { id, .. } => Some(*id),
            Parameter::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcfMessage {
    pub header: Header,
    pub parameters: Vec<Parameter>,
}

impl PcfMessage {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            parameters: Vec::new(),
        }
    }

    pub fn with(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn is_last(&self) -> bool {
        self.header.last
    }

    pub fn integer(&self, id: i32) -> Option<i32> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::Integer { id: pid, value } if *pid == id => Some(*value),
            _ => None,
        })
    }

    pub fn string(&self, id: i32) -> Option<&str> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::String { id: pid, value, .. } if *pid == id => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn integer_list(&self, id: i32) -> Option<&[i32]> {
        self.parameters.iter().find_map(|p| match p {
            Parameter::IntegerList { id: pid, values } if *pid == id => Some(values.as_slice()),
            _ => None,
        })
    }
}
