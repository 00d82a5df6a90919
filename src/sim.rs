//! In-memory queue manager that plays the local node of a cluster.
//!
//! It keeps local queues, knows the instances other queue managers advertise,
//! answers admin commands put to the admin queue, and runs gets and puts
//! inside a single unit of work so commit and backout behave as they do on a
//! real queue manager. Faults (a broken connection, a stop request, a queue
//! held exclusively by another process) are scheduled through [`Scenario`].

use crate::admin::ADMIN_FORMAT;
use crate::classifier::ConfigurationDelta;
use crate::client::{
    ClientError, ClientResult, GetOptions, InputMode, Message, MessageContext,
    MessageId, ObjectHandle, OpenOptions, PutOptions, PutOutcome, QueueClient, Reason, ID_LENGTH,
    NO_ID, STOP_CORREL_ID,
};
use crate::error::{Error, Result};
use crate::pcf::{self, command, param, queue_type, Header, Parameter, PcfMessage, UseQueuePolicy};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

const SIM_USER: &str = "clusmon";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    /// Cluster the queue is advertised in; empty for unclustered queues.
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub open_input_count: i32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_use_queue")]
    pub use_queue: UseQueuePolicy,
    /// Messages present when the scenario starts.
    #[serde(default)]
    pub depth: u32,
    #[serde(default = "default_message_size")]
    pub message_size: usize,
}

/// An instance of a clustered queue hosted by another queue manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInstance {
    pub queue: String,
    pub owner: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub queue_manager: String,
    #[serde(default = "default_admin_queue")]
    pub admin_queue: String,
    #[serde(default = "default_control_queue")]
    pub control_queue: String,
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
    #[serde(default)]
    pub remote_instances: Vec<RemoteInstance>,
    /// A stop message arrives during the Nth wait that finds nothing.
    #[serde(default)]
    pub stop_after_waits: Option<u32>,
    /// The connection breaks at the Nth wait that finds nothing.
    #[serde(default)]
    pub break_connection_after_waits: Option<u32>,
    /// The Nth put to an application queue resolves to the local instance.
    #[serde(default)]
    pub self_route_at_put: Option<u32>,
    /// Queues another process holds open for exclusive input.
    #[serde(default)]
    pub held_exclusive: Vec<String>,
    /// Seconds after which the exclusive holds are released.
    #[serde(default)]
    pub release_holds_after_secs: Option<u64>,
    /// Queues whose gets are inhibited.
    #[serde(default)]
    pub get_inhibited: Vec<String>,
    /// Queues whose puts are inhibited.
    #[serde(default)]
    pub put_inhibited: Vec<String>,
    /// The Nth commit of a non-empty unit of work fails and leaves it open.
    #[serde(default)]
    pub fail_commit_at: Option<u32>,
    #[serde(default = "default_true")]
    pub command_server_running: bool,
}

fn default_use_queue() -> UseQueuePolicy {
    UseQueuePolicy::Local
}

fn default_message_size() -> usize {
    32
}

fn default_admin_queue() -> String {
    "SYSTEM.ADMIN.COMMAND.QUEUE".to_string()
}

fn default_control_queue() -> String {
    "SYSTEM.CLUSTER.MONITOR.QUEUE".to_string()
}

fn default_true() -> bool {
    true
}

impl Scenario {
    pub fn new(queue_manager: impl Into<String>) -> Self {
        Self {
            queue_manager: queue_manager.into(),
            admin_queue: default_admin_queue(),
            control_queue: default_control_queue(),
            queues: Vec::new(),
            remote_instances: Vec::new(),
            stop_after_waits: None,
            break_connection_after_waits: None,
            self_route_at_put: None,
            held_exclusive: Vec::new(),
            release_holds_after_secs: None,
            get_inhibited: Vec::new(),
            put_inhibited: Vec::new(),
            fail_commit_at: None,
            command_server_running: true,
        }
    }

    /// Loads a scenario from a JSON or YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            _ => Err(Error::Config(format!(
                "Unsupported scenario file: {}",
                path.display()
            ))),
        }
    }

    pub fn with_queue(mut self, queue: QueueSpec) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn with_remote(mut self, queue: &str, owner: &str, priority: i32) -> Self {
        self.remote_instances.push(RemoteInstance {
            queue: queue.to_string(),
            owner: owner.to_string(),
            priority,
        });
        self
    }
}

impl QueueSpec {
    pub fn clustered(name: &str, cluster: &str) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.to_string(),
            open_input_count: 0,
            priority: 0,
            use_queue: UseQueuePolicy::Local,
            depth: 0,
            message_size: default_message_size(),
        }
    }

    pub fn consumers(mut self, open_input_count: i32) -> Self {
        self.open_input_count = open_input_count;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn use_queue(mut self, policy: UseQueuePolicy) -> Self {
        self.use_queue = policy;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn message_size(mut self, size: usize) -> Self {
        self.message_size = size;
        self
    }
}

/// A message the cluster routed to another queue manager.
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    pub queue: String,
    pub owner: String,
    pub message: Message,
}

#[derive(Debug)]
struct LocalQueue {
    cluster: String,
    open_input_count: i32,
    priority: i32,
    use_queue: UseQueuePolicy,
    messages: VecDeque<Message>,
    get_inhibited: bool,
}

impl LocalQueue {
    fn system() -> Self {
        Self {
            cluster: String::new(),
            open_input_count: 0,
            priority: 0,
            use_queue: UseQueuePolicy::Local,
            messages: VecDeque::new(),
            get_inhibited: false,
        }
    }
}

#[derive(Debug)]
struct OpenObject {
    queue: String,
    options: OpenOptions,
    saved_context: Option<MessageContext>,
}

#[derive(Debug)]
enum Destination {
    Local,
    Remote(String),
}

#[derive(Debug)]
enum UnitOfWork {
    Got { queue: String, message: Message },
    Put { queue: String, to: Destination, message: Message },
}

pub struct SimulatedCluster {
    scenario: Scenario,
    connected: bool,
    broken: bool,
    queues: BTreeMap<String, LocalQueue>,
    handles: HashMap<u32, OpenObject>,
    next_handle: u32,
    next_msg_id: u64,
    exclusive: HashSet<String>,
    uncommitted: Vec<UnitOfWork>,
    commit_log: Vec<usize>,
    commits: u32,
    backouts: u32,
    routed: Vec<RoutedMessage>,
    changes: Vec<(String, ConfigurationDelta)>,
    commands: u32,
    application_puts: u32,
    waits: u32,
    failed_opens: u32,
    started: Instant,
}

impl SimulatedCluster {
    pub fn new(scenario: Scenario) -> Self {
        let mut queues = BTreeMap::new();
        queues.insert(scenario.admin_queue.clone(), LocalQueue::system());
        queues.insert(scenario.control_queue.clone(), LocalQueue::system());

        let mut cluster = Self {
            connected: false,
            broken: false,
            queues,
            handles: HashMap::new(),
            next_handle: 1,
            next_msg_id: 1,
            exclusive: HashSet::new(),
            uncommitted: Vec::new(),
            commit_log: Vec::new(),
            commits: 0,
            backouts: 0,
            routed: Vec::new(),
            changes: Vec::new(),
            commands: 0,
            application_puts: 0,
            waits: 0,
            failed_opens: 0,
            started: Instant::now(),
            scenario: scenario.clone(),
        };

        for spec in &scenario.queues {
            let mut queue = LocalQueue {
                cluster: spec.cluster.clone(),
                open_input_count: spec.open_input_count,
                priority: spec.priority,
                use_queue: spec.use_queue,
                messages: VecDeque::new(),
                get_inhibited: false,
            };
            for n in 0..spec.depth {
                let mut payload = format!("{}#{}", spec.name, n).into_bytes();
                payload.resize(spec.message_size.max(payload.len()), b'.');
                let mut message = Message::new(payload);
                message.descriptor.msg_id = cluster.new_msg_id();
                message.descriptor.persistent = true;
                message.descriptor.context = MessageContext {
                    user_identifier: "app".to_string(),
                    put_application: "producer".to_string(),
                    put_timestamp: Some(Utc::now()),
                };
                queue.messages.push_back(message);
            }
            cluster.queues.insert(spec.name.clone(), queue);
        }
        for name in &scenario.get_inhibited {
            if let Some(queue) = cluster.queues.get_mut(name) {
                queue.get_inhibited = true;
            }
        }
        cluster
    }

    pub fn queue_manager(&self) -> &str {
        &self.scenario.queue_manager
    }

    pub fn depth(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.messages.len())
    }

    pub fn priority(&self, queue: &str) -> Option<i32> {
        self.queues.get(queue).map(|q| q.priority)
    }

    pub fn use_queue(&self, queue: &str) -> Option<UseQueuePolicy> {
        self.queues.get(queue).map(|q| q.use_queue)
    }

    pub fn open_input_count(&self, queue: &str) -> Option<i32> {
        self.queues.get(queue).map(|q| q.open_input_count)
    }

    /// Number of gets in each committed unit of work.
    pub fn commit_log(&self) -> &[usize] {
        &self.commit_log
    }

    pub fn backouts(&self) -> u32 {
        self.backouts
    }

    pub fn routed(&self) -> &[RoutedMessage] {
        &self.routed
    }

    /// Change commands applied, in order.
    pub fn changes(&self) -> &[(String, ConfigurationDelta)] {
        &self.changes
    }

    pub fn commands_processed(&self) -> u32 {
        self.commands
    }

    pub fn failed_opens(&self) -> u32 {
        self.failed_opens
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Puts a message on a local queue outside any unit of work.
    pub fn enqueue(&mut self, queue: &str, message: Message) -> bool {
        match self.queues.get_mut(queue) {
            Some(local) => {
                local.messages.push_back(message);
                true
            }
            None => false,
        }
    }

    /// Queues a stop request on the control queue.
    pub fn request_stop(&mut self) {
        let mut message = Message::new(Bytes::new());
        message.descriptor.correl_id = STOP_CORREL_ID;
        let control_queue = self.scenario.control_queue.clone();
        self.enqueue(&control_queue, message);
    }

    fn new_msg_id(&mut self) -> MessageId {
        let mut id = NO_ID;
        let prefix = b"SIMMSG";
        id[..prefix.len()].copy_from_slice(prefix);
        id[ID_LENGTH - 8..].copy_from_slice(&self.next_msg_id.to_be_bytes());
        self.next_msg_id += 1;
        id
    }

    fn check_connection(&self) -> ClientResult<()> {
        if self.broken {
            return Err(ClientError::failed(Reason::CONNECTION_BROKEN));
        }
        if !self.connected {
            return Err(ClientError::failed(Reason::HCONN_ERROR));
        }
        Ok(())
    }

    fn object(&self, handle: ObjectHandle) -> ClientResult<&OpenObject> {
        self.handles
            .get(&handle.0)
            .ok_or(ClientError::failed(Reason::HOBJ_ERROR))
    }

    fn held_by_other(&self, queue: &str) -> bool {
        if !self.scenario.held_exclusive.iter().any(|q| q == queue) {
            return false;
        }
        match self.scenario.release_holds_after_secs {
            Some(secs) => self.started.elapsed() < Duration::from_secs(secs),
            None => true,
        }
    }

    fn is_remote_only(&self, queue: &str) -> bool {
        !self.queues.contains_key(queue)
            && self.scenario.remote_instances.iter().any(|r| r.queue == queue)
    }

    /// Picks the instance an application put goes to: the best remote
    /// instance when it outranks the local one, the local instance otherwise.
    fn resolve(&mut self, queue: &str) -> Destination {
        self.application_puts += 1;
        if self.scenario.self_route_at_put == Some(self.application_puts)
            && self.queues.contains_key(queue)
        {
            return Destination::Local;
        }

        let best_remote = self
            .scenario
            .remote_instances
            .iter()
            .filter(|r| r.queue == queue)
            .max_by_key(|r| r.priority);
        match (self.queues.get(queue), best_remote) {
            (Some(local), Some(remote)) if remote.priority > local.priority => {
                Destination::Remote(remote.owner.clone())
            }
            (Some(_), _) => Destination::Local,
            (None, Some(remote)) => Destination::Remote(remote.owner.clone()),
            (None, None) => Destination::Local,
        }
    }

    fn deliver(&mut self, queue: String, to: Destination, message: Message) {
        match to {
            Destination::Local => {
                if let Some(local) = self.queues.get_mut(&queue) {
                    local.messages.push_back(message);
                }
            }
            Destination::Remote(owner) => self.routed.push(RoutedMessage {
                queue,
                owner,
                message,
            }),
        }
    }

    fn take_message(
        &mut self,
        queue: &str,
        options: &GetOptions,
        buffer_len: usize,
    ) -> ClientResult<Option<Message>> {
        let local = self
            .queues
            .get_mut(queue)
            .ok_or(ClientError::failed(Reason::UNKNOWN_OBJECT_NAME))?;
        if local.get_inhibited {
            return Err(ClientError::failed(Reason::GET_INHIBITED));
        }

        let position = local.messages.iter().position(|m| match options.match_correl_id {
            Some(correl_id) => m.descriptor.correl_id == correl_id,
            None => true,
        });
        let Some(position) = position else {
            return Ok(None);
        };

        let required = local.messages[position].payload.len();
        if required > buffer_len {
            return Err(ClientError::Truncated { required });
        }
        Ok(local.messages.remove(position))
    }

    /// Counts a wait that found nothing and applies any fault scheduled for it.
    fn scheduled_wait(&mut self) -> ClientResult<Option<Message>> {
        self.waits += 1;
        if self.scenario.break_connection_after_waits == Some(self.waits) {
            log::debug!("Simulated connection break at wait {}", self.waits);
            self.broken = true;
            return Err(ClientError::failed(Reason::CONNECTION_BROKEN));
        }
        if self.scenario.stop_after_waits == Some(self.waits) {
            log::debug!("Simulated stop request at wait {}", self.waits);
            let mut message = Message::new(Bytes::new());
            message.descriptor.correl_id = STOP_CORREL_ID;
            return Ok(Some(message));
        }
        Ok(None)
    }

    fn process_command(&mut self, request: &Message) {
        self.commands += 1;
        let replies = match pcf::decode(&request.payload) {
            Ok(message) => self.execute(&message),
            Err(e) => {
                log::debug!("Simulated command server rejected a request: {}", e);
                vec![failure(0, Reason::COMMAND_FAILED)]
            }
        };

        let reply_queue = request.descriptor.reply_to_queue.clone();
        for reply in replies {
            let mut message = Message::new(pcf::encode(&reply));
            message.descriptor.msg_id = self.new_msg_id();
            message.descriptor.correl_id = request.descriptor.msg_id;
            message.descriptor.format = ADMIN_FORMAT.to_string();
            if !self.enqueue(&reply_queue, message) {
                log::debug!("Dropping reply for unknown queue {}", reply_queue);
                break;
            }
        }
    }

    fn execute(&mut self, request: &PcfMessage) -> Vec<PcfMessage> {
        let name = request.string(param::Q_NAME).unwrap_or_default().to_string();
        match request.header.command {
            command::INQUIRE_Q => match request.integer(param::Q_TYPE) {
                Some(queue_type::CLUSTER) => self.inquire_cluster(&name),
                _ => {
                    let cluster = request.string(param::CLUSTER_NAME).unwrap_or_default();
                    self.inquire_local(&name, cluster)
                }
            },
            command::CHANGE_Q => self.change(&name, request),
            other => vec![failure(other, Reason::COMMAND_FAILED)],
        }
    }

    fn inquire_local(&self, mask: &str, cluster: &str) -> Vec<PcfMessage> {
        let matched: Vec<PcfMessage> = self
            .queues
            .iter()
            .filter(|(name, queue)| {
                matches_mask(name, mask)
                    && !queue.cluster.is_empty()
                    && (cluster.is_empty() || queue.cluster == cluster)
            })
            .map(|(name, queue)| {
                PcfMessage::new(Header::response(command::INQUIRE_Q, 0, false))
                    .with(Parameter::string(param::Q_NAME, name.as_str()))
                    .with(Parameter::string(param::CLUSTER_NAME, queue.cluster.as_str()))
                    .with(Parameter::integer(param::OPEN_INPUT_COUNT, queue.open_input_count))
                    .with(Parameter::integer(param::CLWL_Q_PRIORITY, queue.priority))
                    .with(Parameter::integer(param::CLWL_USEQ, queue.use_queue.as_raw()))
                    .with(Parameter::integer(
                        param::CURRENT_Q_DEPTH,
                        queue.messages.len() as i32,
                    ))
            })
            .collect();
        sequence(command::INQUIRE_Q, matched)
    }

    fn inquire_cluster(&self, queue: &str) -> Vec<PcfMessage> {
        let mut instances = Vec::new();
        if let Some(local) = self.queues.get(queue).filter(|q| !q.cluster.is_empty()) {
            instances.push((self.scenario.queue_manager.as_str(), local.priority));
        }
        for remote in self.scenario.remote_instances.iter().filter(|r| r.queue == queue) {
            instances.push((remote.owner.as_str(), remote.priority));
        }

        let replies = instances
            .into_iter()
            .map(|(owner, priority)| {
                PcfMessage::new(Header::response(command::INQUIRE_Q, 0, false))
                    .with(Parameter::string(param::Q_NAME, queue))
                    .with(Parameter::string(param::CLUSTER_Q_MGR_NAME, owner))
                    .with(Parameter::integer(param::CLWL_Q_PRIORITY, priority))
            })
            .collect();
        sequence(command::INQUIRE_Q, replies)
    }

    fn change(&mut self, name: &str, request: &PcfMessage) -> Vec<PcfMessage> {
        let Some(queue) = self.queues.get_mut(name) else {
            return vec![failure(command::CHANGE_Q, Reason::UNKNOWN_OBJECT_NAME)];
        };

        let mut delta = ConfigurationDelta::default();
        if let Some(priority) = request.integer(param::CLWL_Q_PRIORITY) {
            queue.priority = priority;
            delta.priority = Some(priority);
        }
        if let Some(policy) = request.integer(param::CLWL_USEQ).and_then(UseQueuePolicy::from_raw) {
            queue.use_queue = policy;
            delta.use_queue = Some(policy);
        }
        self.changes.push((name.to_string(), delta));
        vec![PcfMessage::new(Header::response(command::CHANGE_Q, 1, true))]
    }
}

fn matches_mask(name: &str, mask: &str) -> bool {
    match mask.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == mask,
    }
}

fn failure(command: i32, reason: Reason) -> PcfMessage {
    let mut header = Header::response(command, 1, true);
    header.completion = 2;
    header.reason = reason.0;
    PcfMessage::new(header)
}

/// Numbers the replies and marks the last one; an empty set becomes a single
/// "not found" reply.
fn sequence(command: i32, mut replies: Vec<PcfMessage>) -> Vec<PcfMessage> {
    if replies.is_empty() {
        return vec![failure(command, Reason::UNKNOWN_OBJECT_NAME)];
    }
    let count = replies.len();
    for (n, reply) in replies.iter_mut().enumerate() {
        reply.header.sequence = n as i32 + 1;
        reply.header.last = n + 1 == count;
    }
    replies
}

#[async_trait]
impl QueueClient for SimulatedCluster {
    async fn connect(&mut self, queue_manager: &str) -> ClientResult<String> {
        if !queue_manager.is_empty() && queue_manager != self.scenario.queue_manager {
            return Err(ClientError::failed(Reason::Q_MGR_NOT_AVAILABLE));
        }
        self.connected = true;
        self.broken = false;
        Ok(self.scenario.queue_manager.clone())
    }

    async fn disconnect(&mut self) -> ClientResult<()> {
        self.check_connection()?;
        if !self.uncommitted.is_empty() {
            self.backout().await?;
        }
        let handles: Vec<u32> = self.handles.keys().copied().collect();
        for handle in handles {
            self.close(ObjectHandle(handle)).await?;
        }
        self.connected = false;
        Ok(())
    }

    async fn open(&mut self, queue: &str, options: OpenOptions) -> ClientResult<ObjectHandle> {
        self.check_connection()?;

        let known = self.queues.contains_key(queue)
            || (options.input.is_none() && self.is_remote_only(queue));
        let result = if !known {
            Err(ClientError::failed(Reason::UNKNOWN_OBJECT_NAME))
        } else if options.input.is_some()
            && (self.exclusive.contains(queue) || self.held_by_other(queue))
        {
            Err(ClientError::failed(Reason::OBJECT_IN_USE))
        } else if options.input == Some(InputMode::Exclusive)
            && self
                .handles
                .values()
                .any(|h| h.queue == queue && h.options.input.is_some())
        {
            Err(ClientError::failed(Reason::OBJECT_IN_USE))
        } else {
            Ok(())
        };
        if let Err(e) = result {
            self.failed_opens += 1;
            return Err(e);
        }

        if let Some(mode) = options.input {
            if mode == InputMode::Exclusive {
                self.exclusive.insert(queue.to_string());
            }
            if let Some(local) = self.queues.get_mut(queue) {
                local.open_input_count += 1;
            }
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(
            handle,
            OpenObject {
                queue: queue.to_string(),
                options,
                saved_context: None,
            },
        );
        Ok(ObjectHandle(handle))
    }

    async fn close(&mut self, handle: ObjectHandle) -> ClientResult<()> {
        self.check_connection()?;
        let object = self
            .handles
            .remove(&handle.0)
            .ok_or(ClientError::failed(Reason::HOBJ_ERROR))?;

        if let Some(mode) = object.options.input {
            if mode == InputMode::Exclusive {
                self.exclusive.remove(&object.queue);
            }
            if let Some(local) = self.queues.get_mut(&object.queue) {
                local.open_input_count -= 1;
            }
        }
        Ok(())
    }

    async fn get(
        &mut self,
        handle: ObjectHandle,
        options: &GetOptions,
        buffer_len: usize,
    ) -> ClientResult<Message> {
        self.check_connection()?;
        let object = self.object(handle)?;
        if object.options.input.is_none() {
            return Err(ClientError::failed(Reason::HOBJ_ERROR));
        }
        let queue = object.queue.clone();
        let save_context = object.options.save_all_context;

        let message = match self.take_message(&queue, options, buffer_len)? {
            Some(message) => message,
            None => {
                let Some(wait) = options.wait else {
                    return Err(ClientError::failed(Reason::NO_MSG_AVAILABLE));
                };
                match self.scheduled_wait()? {
                    Some(message) => message,
                    None => {
                        tokio::time::sleep(wait).await;
                        return Err(ClientError::failed(Reason::NO_MSG_AVAILABLE));
                    }
                }
            }
        };

        if save_context {
            if let Some(object) = self.handles.get_mut(&handle.0) {
                object.saved_context = Some(message.descriptor.context.clone());
            }
        }
        if options.syncpoint {
            self.uncommitted.push(UnitOfWork::Got {
                queue,
                message: message.clone(),
            });
        }
        Ok(message)
    }

    async fn put(
        &mut self,
        handle: ObjectHandle,
        message: &Message,
        options: &PutOptions,
    ) -> ClientResult<PutOutcome> {
        self.check_connection()?;
        let object = self.object(handle)?;
        if !object.options.output {
            return Err(ClientError::failed(Reason::HOBJ_ERROR));
        }
        let queue = object.queue.clone();
        let pass_all_context = object.options.pass_all_context;

        let context = match options.pass_context_from {
            Some(source) if pass_all_context => self
                .object(source)?
                .saved_context
                .clone()
                .unwrap_or_default(),
            Some(_) => return Err(ClientError::failed(Reason::HOBJ_ERROR)),
            None => MessageContext {
                user_identifier: SIM_USER.to_string(),
                put_application: SIM_USER.to_string(),
                put_timestamp: Some(Utc::now()),
            },
        };

        let mut stored = message.clone();
        stored.descriptor.context = context;
        if options.new_msg_id || stored.descriptor.msg_id == NO_ID {
            stored.descriptor.msg_id = self.new_msg_id();
        }
        let msg_id = stored.descriptor.msg_id;

        if queue == self.scenario.admin_queue {
            if self.scenario.command_server_running {
                self.process_command(&stored);
            }
            return Ok(PutOutcome {
                msg_id,
                resolved_queue_manager: self.scenario.queue_manager.clone(),
            });
        }

        if self.scenario.put_inhibited.iter().any(|q| *q == queue) {
            return Err(ClientError::failed(Reason::PUT_INHIBITED));
        }

        let destination = self.resolve(&queue);
        let resolved_queue_manager = match &destination {
            Destination::Local => self.scenario.queue_manager.clone(),
            Destination::Remote(owner) => owner.clone(),
        };
        if options.syncpoint {
            self.uncommitted.push(UnitOfWork::Put {
                queue,
                to: destination,
                message: stored,
            });
        } else {
            self.deliver(queue, destination, stored);
        }

        Ok(PutOutcome {
            msg_id,
            resolved_queue_manager,
        })
    }

    async fn commit(&mut self) -> ClientResult<()> {
        self.check_connection()?;
        if self.uncommitted.is_empty() {
            return Ok(());
        }
        self.commits += 1;
        if self.scenario.fail_commit_at == Some(self.commits) {
            log::debug!("Simulated commit failure at commit {}", self.commits);
            return Err(ClientError::failed(Reason::BACKED_OUT));
        }
        let work = std::mem::take(&mut self.uncommitted);

        let mut gets = 0;
        for unit in work {
            match unit {
                UnitOfWork::Got { .. } => gets += 1,
                UnitOfWork::Put { queue, to, message } => self.deliver(queue, to, message),
            }
        }
        self.commit_log.push(gets);
        Ok(())
    }

    async fn backout(&mut self) -> ClientResult<()> {
        self.check_connection()?;
        let work = std::mem::take(&mut self.uncommitted);
        self.backouts += 1;

        // Restore got messages to the head of their queues in original order.
        for unit in work.into_iter().rev() {
            if let UnitOfWork::Got { queue, message } = unit {
                if let Some(local) = self.queues.get_mut(&queue) {
                    local.messages.push_front(message);
                }
            }
        }
        Ok(())
    }
}
