use crate::client::ClientError;
use crate::context::StopReason;
use crate::pcf::PcfError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Environment override error: {0}")]
    Settings(#[from] ::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A queuing call failed.
    #[error("{operation} on {object} failed: {source}")]
    Queue {
        operation: &'static str,
        object: String,
        #[source]
        source: ClientError,
    },

    /// A call on the queue the monitor receives replies and stop requests on.
    #[error("{operation} on control queue {object} failed: {source}")]
    ControlQueue {
        operation: &'static str,
        object: String,
        #[source]
        source: ClientError,
    },

    #[error("Malformed admin message from {object}: {source}")]
    Protocol {
        object: String,
        #[source]
        source: PcfError,
    },

    #[error("No reply to {command} from the command server within the wait interval")]
    NoReply { command: &'static str },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn queue(operation: &'static str, object: impl Into<String>, source: ClientError) -> Self {
        Error::Queue {
            operation,
            object: object.into(),
            source,
        }
    }

    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            Error::Queue { source, .. } | Error::ControlQueue { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The reason the monitor has to stop because of this error, if any.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Error::Queue { source, .. } if source.is_fatal() => {
                Some(StopReason::from_client_error(source))
            }
            Error::ControlQueue { source, .. }
                if source.is_fatal() || source.reason().is_channel_fatal() =>
            {
                Some(StopReason::from_client_error(source))
            }
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.stop_reason().is_some()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
