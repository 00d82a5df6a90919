use crate::client::{ClientError, Reason};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Why the monitor is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stop message arrived on the control queue.
    Requested,
    /// The process was interrupted.
    Interrupted,
    /// The connection to the queue manager failed or is ending.
    ConnectionLost(Reason),
    /// The control queue can no longer be read.
    ControlQueueUnusable(Reason),
}

impl StopReason {
    pub fn from_client_error(error: &ClientError) -> Self {
        let reason = error.reason();
        if reason.is_connection_fatal() {
            StopReason::ConnectionLost(reason)
        } else {
            StopReason::ControlQueueUnusable(reason)
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "stop requested on the control queue"),
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::ConnectionLost(reason) => {
                write!(f, "connection to the queue manager lost, reason {}", reason)
            }
            StopReason::ControlQueueUnusable(reason) => {
                write!(f, "control queue no longer usable, reason {}", reason)
            }
        }
    }
}

#[derive(Default)]
struct StopState {
    reason: OnceLock<StopReason>,
    notify: Notify,
}

/// Process-wide stop flag. Once raised it stays raised; the first reason wins.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopState>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Returns `true` if this call raised it.
    pub fn raise(&self, reason: StopReason) -> bool {
        let first = self.inner.reason.set(reason).is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_raised(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.inner.reason.get().copied()
    }

    /// Resolves once the signal is raised.
    pub async fn raised(&self) {
        let notified = self.inner.notify.notified();
        if self.is_raised() {
            return;
        }
        notified.await;
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("reason", &self.reason())
            .finish()
    }
}
