//! Request/reply exchange with the queue manager's command server.
//!
//! Requests go to the admin queue with the control queue as reply-to; every
//! reply carries the request's message id as its correlation id, so replies
//! to different requests can be read independently of each other.

use crate::client::{
    get_with_resize, GetOptions, Message, MessageDescriptor, MessageId, ObjectHandle, PutOptions,
    QueueClient,
};
use crate::error::{Error, Result};
use crate::pcf::{self, PcfError, PcfMessage, MAX_REQUEST_LENGTH};
use std::time::Duration;

pub const ADMIN_FORMAT: &str = "MQADMIN";

/// Replies still to be read for one request.
#[derive(Debug)]
pub struct PendingReplies {
    command: &'static str,
    object: String,
    correl_id: MessageId,
    done: bool,
}

impl PendingReplies {
    pub fn command(&self) -> &'static str {
        self.command
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[derive(Debug)]
pub struct AdminChannel {
    admin_queue: String,
    admin: ObjectHandle,
    reply_queue: String,
    reply: ObjectHandle,
    reply_wait: Duration,
    buffer_len: usize,
}

impl AdminChannel {
    pub fn new(
        admin_queue: impl Into<String>,
        admin: ObjectHandle,
        reply_queue: impl Into<String>,
        reply: ObjectHandle,
        reply_wait: Duration,
        buffer_len: usize,
    ) -> Self {
        Self {
            admin_queue: admin_queue.into(),
            admin,
            reply_queue: reply_queue.into(),
            reply,
            reply_wait,
            buffer_len,
        }
    }

    pub fn admin_queue(&self) -> &str {
        &self.admin_queue
    }

    pub fn admin_handle(&self) -> ObjectHandle {
        self.admin
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn reply_handle(&self) -> ObjectHandle {
        self.reply
    }

    /// Current receive buffer size; grows when a reply did not fit.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub async fn send<C>(
        &self,
        client: &mut C,
        command: &'static str,
        object: &str,
        request: &PcfMessage,
    ) -> Result<PendingReplies>
    where
        C: QueueClient + ?Sized,
    {
        let payload = pcf::encode(request);
        if payload.len() > MAX_REQUEST_LENGTH {
            return Err(Error::Protocol {
                object: object.to_string(),
                source: PcfError::RequestTooLarge {
                    size: payload.len(),
                    limit: MAX_REQUEST_LENGTH,
                },
            });
        }

        let message = Message {
            descriptor: MessageDescriptor {
                format: ADMIN_FORMAT.to_string(),
                reply_to_queue: self.reply_queue.clone(),
                ..MessageDescriptor::default()
            },
            payload,
        };
        let options = PutOptions {
            new_msg_id: true,
            ..PutOptions::default()
        };
        let outcome = client
            .put(self.admin, &message, &options)
            .await
            .map_err(|e| Error::queue("put", self.admin_queue.as_str(), e))?;

        log::debug!("Sent {} request for {} to {}", command, object, self.admin_queue);
        Ok(PendingReplies {
            command,
            object: object.to_string(),
            correl_id: outcome.msg_id,
            done: false,
        })
    }

    /// Reads the next reply, or `None` once the final reply has been read.
    pub async fn next_reply<C>(
        &mut self,
        client: &mut C,
        pending: &mut PendingReplies,
    ) -> Result<Option<PcfMessage>>
    where
        C: QueueClient + ?Sized,
    {
        if pending.done {
            return Ok(None);
        }

        let options = GetOptions::waiting(self.reply_wait).matching(pending.correl_id);
        let message = match get_with_resize(client, self.reply, &options, &mut self.buffer_len).await
        {
            Ok(message) => message,
            Err(e) if e.is_no_message() => {
                pending.done = true;
                return Err(Error::NoReply {
                    command: pending.command,
                });
            }
            Err(e) => {
                pending.done = true;
                return Err(Error::ControlQueue {
                    operation: "get",
                    object: self.reply_queue.clone(),
                    source: e,
                });
            }
        };

        let reply = pcf::decode(&message.payload).map_err(|source| {
            pending.done = true;
            Error::Protocol {
                object: self.reply_queue.clone(),
                source,
            }
        })?;
        if reply.is_last() {
            pending.done = true;
        }
        Ok(Some(reply))
    }
}
