//! Boundary to the external queuing system.
//!
//! Everything the monitor needs from a queue manager goes through the
//! [`QueueClient`] trait. Each call either succeeds or reports a completion
//! code and reason code pair, mirroring how the underlying client library
//! reports failures.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Length of message and correlation identifiers.
pub const ID_LENGTH: usize = 24;

/// Maximum length of a queue or queue manager name.
pub const NAME_LENGTH: usize = 48;

pub type MessageId = [u8; ID_LENGTH];

/// Correlation id that asks a running monitor to stop.
pub const STOP_CORREL_ID: MessageId = *b"STOP CLUSTER MONITOR\0\0\0\0";

pub const NO_ID: MessageId = [0; ID_LENGTH];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionCode {
    Ok,
    Warning,
    Failed,
}

impl CompletionCode {
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => CompletionCode::Ok,
            1 => CompletionCode::Warning,
            _ => CompletionCode::Failed,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            CompletionCode::Ok => 0,
            CompletionCode::Warning => 1,
            CompletionCode::Failed => 2,
        }
    }
}

impl fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// Reason code returned alongside a completion code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reason(pub i32);

impl Reason {
    pub const NONE: Reason = Reason(0);
    pub const CONNECTION_BROKEN: Reason = Reason(2009);
    pub const GET_INHIBITED: Reason = Reason(2016);
    pub const HCONN_ERROR: Reason = Reason(2018);
    pub const HOBJ_ERROR: Reason = Reason(2019);
    pub const NO_MSG_AVAILABLE: Reason = Reason(2033);
    pub const OBJECT_CHANGED: Reason = Reason(2041);
    pub const OBJECT_IN_USE: Reason = Reason(2042);
    pub const PUT_INHIBITED: Reason = Reason(2051);
    pub const Q_DELETED: Reason = Reason(2052);
    pub const Q_FULL: Reason = Reason(2053);
    pub const Q_MGR_NOT_AVAILABLE: Reason = Reason(2059);
    pub const TRUNCATED_MSG_FAILED: Reason = Reason(2080);
    pub const UNKNOWN_OBJECT_NAME: Reason = Reason(2085);
    pub const OBJECT_DAMAGED: Reason = Reason(2101);
    pub const BACKED_OUT: Reason = Reason(2003);
    pub const Q_MGR_QUIESCING: Reason = Reason(2161);
    pub const Q_MGR_STOPPING: Reason = Reason(2162);
    pub const CONNECTION_QUIESCING: Reason = Reason(2202);
    pub const CONNECTION_STOPPING: Reason = Reason(2203);
    pub const COMMAND_FAILED: Reason = Reason(3008);

    /// The connection to the queue manager is gone or going away.
    pub fn is_connection_fatal(self) -> bool {
        matches!(
            self,
            Reason::CONNECTION_BROKEN
                | Reason::HCONN_ERROR
                | Reason::Q_MGR_NOT_AVAILABLE
                | Reason::Q_MGR_QUIESCING
                | Reason::Q_MGR_STOPPING
                | Reason::CONNECTION_QUIESCING
                | Reason::CONNECTION_STOPPING
        )
    }

    /// The queue the monitor listens on can no longer be used.
    pub fn is_channel_fatal(self) -> bool {
        matches!(
            self,
            Reason::GET_INHIBITED | Reason::OBJECT_CHANGED | Reason::Q_DELETED | Reason::OBJECT_DAMAGED
        )
    }

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Reason::NONE => "NONE",
            Reason::BACKED_OUT => "BACKED_OUT",
            Reason::CONNECTION_BROKEN => "CONNECTION_BROKEN",
            Reason::GET_INHIBITED => "GET_INHIBITED",
            Reason::HCONN_ERROR => "HCONN_ERROR",
            Reason::HOBJ_ERROR => "HOBJ_ERROR",
            Reason::NO_MSG_AVAILABLE => "NO_MSG_AVAILABLE",
            Reason::OBJECT_CHANGED => "OBJECT_CHANGED",
            Reason::OBJECT_IN_USE => "OBJECT_IN_USE",
            Reason::PUT_INHIBITED => "PUT_INHIBITED",
            Reason::Q_DELETED => "Q_DELETED",
            Reason::Q_FULL => "Q_FULL",
            Reason::Q_MGR_NOT_AVAILABLE => "Q_MGR_NOT_AVAILABLE",
            Reason::TRUNCATED_MSG_FAILED => "TRUNCATED_MSG_FAILED",
            Reason::UNKNOWN_OBJECT_NAME => "UNKNOWN_OBJECT_NAME",
            Reason::OBJECT_DAMAGED => "OBJECT_DAMAGED",
            Reason::Q_MGR_QUIESCING => "Q_MGR_QUIESCING",
            Reason::Q_MGR_STOPPING => "Q_MGR_STOPPING",
            Reason::CONNECTION_QUIESCING => "CONNECTION_QUIESCING",
            Reason::CONNECTION_STOPPING => "CONNECTION_STOPPING",
            Reason::COMMAND_FAILED => "COMMAND_FAILED",
            _ => return None,
        })
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("completion code {completion}, reason {reason}")]
    Call {
        completion: CompletionCode,
        reason: Reason,
    },

    /// The receive buffer was too small; `required` is the full message length.
    #[error("buffer too small, {required} bytes required")]
    Truncated { required: usize },
}

impl ClientError {
    pub fn failed(reason: Reason) -> Self {
        ClientError::Call {
            completion: CompletionCode::Failed,
            reason,
        }
    }

    pub fn completion(&self) -> CompletionCode {
        match self {
            ClientError::Call { completion, .. } => *completion,
            ClientError::Truncated { .. } => CompletionCode::Warning,
        }
    }

    pub fn reason(&self) -> Reason {
        match self {
            ClientError::Call { reason, .. } => *reason,
            ClientError::Truncated { .. } => Reason::TRUNCATED_MSG_FAILED,
        }
    }

    pub fn is_no_message(&self) -> bool {
        self.reason() == Reason::NO_MSG_AVAILABLE
    }

    pub fn is_fatal(&self) -> bool {
        self.reason().is_connection_fatal()
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Shared,
    Exclusive,
}

/// How a queue is opened. Only the options the monitor uses are modelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub input: Option<InputMode>,
    pub output: bool,
    pub save_all_context: bool,
    pub pass_all_context: bool,
    /// Let the cluster choose a destination instance for every put.
    pub bind_not_fixed: bool,
}

impl OpenOptions {
    pub fn exclusive_input() -> Self {
        Self {
            input: Some(InputMode::Exclusive),
            ..Self::default()
        }
    }

    pub fn output() -> Self {
        Self {
            output: true,
            ..Self::default()
        }
    }

    pub fn context_saving_input() -> Self {
        Self {
            input: Some(InputMode::Shared),
            save_all_context: true,
            ..Self::default()
        }
    }

    pub fn workload_balanced_output() -> Self {
        Self {
            output: true,
            pass_all_context: true,
            bind_not_fixed: true,
            ..Self::default()
        }
    }
}

/// Identity and origin context carried with a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    pub user_identifier: String,
    pub put_application: String,
    pub put_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub msg_id: MessageId,
    pub correl_id: MessageId,
    pub format: String,
    pub reply_to_queue: String,
    pub reply_to_queue_manager: String,
    pub persistent: bool,
    pub priority: u8,
    pub context: MessageContext,
}

impl Default for MessageDescriptor {
    fn default() -> Self {
        Self {
            msg_id: NO_ID,
            correl_id: NO_ID,
            format: String::new(),
            reply_to_queue: String::new(),
            reply_to_queue_manager: String::new(),
            persistent: false,
            priority: 0,
            context: MessageContext::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub descriptor: MessageDescriptor,
    pub payload: Bytes,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            descriptor: MessageDescriptor::default(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// `None` returns immediately when no message is available.
    pub wait: Option<Duration>,
    pub syncpoint: bool,
    pub match_correl_id: Option<MessageId>,
}

impl GetOptions {
    pub fn no_wait() -> Self {
        Self::default()
    }

    pub fn waiting(wait: Duration) -> Self {
        Self {
            wait: Some(wait),
            ..Self::default()
        }
    }

    pub fn under_syncpoint(mut self) -> Self {
        self.syncpoint = true;
        self
    }

    pub fn matching(mut self, correl_id: MessageId) -> Self {
        self.match_correl_id = Some(correl_id);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub syncpoint: bool,
    pub new_msg_id: bool,
    /// Copy all context from the message last retrieved through this handle.
    pub pass_context_from: Option<ObjectHandle>,
}

/// What a successful put resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub msg_id: MessageId,
    pub resolved_queue_manager: String,
}

#[async_trait]
pub trait QueueClient: Send {
    /// Connects and returns the name of the queue manager actually connected to.
    async fn connect(&mut self, queue_manager: &str) -> ClientResult<String>;
    async fn disconnect(&mut self) -> ClientResult<()>;
    async fn open(&mut self, queue: &str, options: OpenOptions) -> ClientResult<ObjectHandle>;
    async fn close(&mut self, handle: ObjectHandle) -> ClientResult<()>;
    /// Gets a message no longer than `buffer_len`; longer messages fail with
    /// [`ClientError::Truncated`] and stay on the queue.
    async fn get(
        &mut self,
        handle: ObjectHandle,
        options: &GetOptions,
        buffer_len: usize,
    ) -> ClientResult<Message>;
    async fn put(
        &mut self,
        handle: ObjectHandle,
        message: &Message,
        options: &PutOptions,
    ) -> ClientResult<PutOutcome>;
    async fn commit(&mut self) -> ClientResult<()>;
    async fn backout(&mut self) -> ClientResult<()>;
}

/// Gets a message, growing `buffer_len` to the reported size and retrying
/// once when the buffer was too small. The grown size is kept for later calls.
pub async fn get_with_resize<C>(
    client: &mut C,
    handle: ObjectHandle,
    options: &GetOptions,
    buffer_len: &mut usize,
) -> ClientResult<Message>
where
    C: QueueClient + ?Sized,
{
    match client.get(handle, options, *buffer_len).await {
        Err(ClientError::Truncated { required }) => {
            log::debug!("Growing receive buffer from {} to {} bytes", buffer_len, required);
            *buffer_len = required;
            client.get(handle, options, *buffer_len).await
        }
        other => other,
    }
}
