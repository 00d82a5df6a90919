use crate::admin::AdminChannel;
use crate::classifier::{self, ClassifierPolicy};
use crate::client::{get_with_resize, GetOptions, OpenOptions, QueueClient, STOP_CORREL_ID};
use crate::config::{ConfigLoader, MonitorConfig};
use crate::context::{StopReason, StopSignal};
use crate::error::{Error, Result};
use crate::events::MonitorEvent;
use crate::locator;
use crate::metrics::{MetricsCollector, StatisticsSnapshot};
use crate::migrator::{self, MigrationJob, MigrationSettings};
use crate::output::{console::ConsoleOutput, OutputHandler};
use crate::pcf::{self, PcfMessage, QueueSnapshot, ResponseStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Connecting,
    Opening,
    Polling,
    Sleeping,
    Draining,
    Terminated,
}

/// Runtime settings of the control loop, resolved from a [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub queue_manager: String,
    pub cluster: String,
    pub masks: Vec<String>,
    pub admin_queue: String,
    pub control_queue: String,
    pub poll_interval: Duration,
    pub initial_delay: Duration,
    pub reply_wait: Duration,
    pub stats_interval: Duration,
    pub stats_every_polls: Option<u64>,
    pub diagnostics: bool,
    pub migrate: bool,
    pub batch_size: u32,
    pub max_migrate_per_pass: Option<u32>,
    pub policy: ClassifierPolicy,
    pub buffer_size: usize,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        Ok(Self {
            queue_manager: config.queue_manager.clone(),
            cluster: config.cluster.clone(),
            masks: ConfigLoader::queue_masks(config)?,
            admin_queue: config.admin_queue.clone(),
            control_queue: config.control_queue.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            reply_wait: Duration::from_millis(config.reply_wait_ms),
            stats_interval: Duration::from_secs(config.stats_interval_secs),
            stats_every_polls: config.stats_every_polls,
            diagnostics: config.diagnostics,
            migrate: config.migrate,
            batch_size: config.batch_size,
            max_migrate_per_pass: config.max_migrate_per_pass,
            policy: ClassifierPolicy {
                active_priority: config.active_priority,
                switch_use_queue: config.switch_use_queue,
                preferred_use_queue: config.preferred_use_queue,
            },
            buffer_size: config.buffer_size,
        })
    }
}

/// Totals over every statistics window of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub queue_manager: String,
    pub polls: u64,
    pub queues_checked: u64,
    pub state_changes: u64,
    pub migration_jobs: u64,
    pub messages_migrated: u64,
    pub stop_reason: Option<StopReason>,
}

impl RunSummary {
    fn absorb(&mut self, window: &StatisticsSnapshot) {
        self.polls += window.polls;
        self.queues_checked += window.queues_checked;
        self.state_changes += window.state_changes;
        self.migration_jobs += window.migration_jobs;
        self.messages_migrated += window.messages_migrated;
    }
}

pub struct MonitorEngine {
    settings: MonitorSettings,
    metrics: Arc<MetricsCollector>,
    stop: StopSignal,
    output: Box<dyn OutputHandler>,
    state_watcher: watch::Sender<MonitorState>,
    summary: RunSummary,
    windows_written: u64,
}

impl MonitorEngine {
    pub fn new(settings: MonitorSettings, output: Option<Box<dyn OutputHandler>>) -> Self {
        let (state_tx, _) = watch::channel(MonitorState::Connecting);

        Self {
            settings,
            metrics: Arc::new(MetricsCollector::new()),
            stop: StopSignal::new(),
            output: output.unwrap_or_else(|| Box::new(ConsoleOutput::default())),
            state_watcher: state_tx,
            summary: RunSummary::default(),
            windows_written: 0,
        }
    }

    /// Handle for raising a stop from outside the loop, e.g. on Ctrl-C.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<StatisticsSnapshot> {
        let (tx, rx) = watch::channel(self.metrics.snapshot());
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if tx.send(metrics.snapshot()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    pub fn watch_state(&self) -> watch::Receiver<MonitorState> {
        self.state_watcher.subscribe()
    }

    fn set_state(&self, state: MonitorState) {
        log::trace!("Monitor state {:?}", state);
        self.state_watcher.send_replace(state);
    }

    /// Runs the control loop until the stop signal is raised.
    ///
    /// Only a failed connect is returned as an error; everything after that
    /// ends the run through the stop signal and is reported in the summary.
    pub async fn run<C>(&mut self, client: &mut C) -> Result<RunSummary>
    where
        C: QueueClient + ?Sized,
    {
        self.set_state(MonitorState::Connecting);
        let local_queue_manager = match client.connect(&self.settings.queue_manager).await {
            Ok(name) => name,
            Err(e) => {
                self.set_state(MonitorState::Terminated);
                return Err(Error::queue("connect", self.settings.queue_manager.as_str(), e));
            }
        };
        MonitorEvent::Connected {
            queue_manager: local_queue_manager.clone(),
        }
        .emit();
        self.summary.queue_manager = local_queue_manager.clone();

        let mut channel: Option<AdminChannel> = None;
        let mut outage = false;
        let mut warmed_up = self.settings.initial_delay.is_zero();

        while !self.stop.is_raised() {
            if channel.is_none() {
                self.set_state(MonitorState::Opening);
                match self.open_channel(client).await {
                    Ok(opened) => {
                        if outage {
                            MonitorEvent::ResourceAcquired {
                                queue: opened.reply_queue().to_string(),
                            }
                            .emit();
                            outage = false;
                        }
                        channel = Some(opened);
                    }
                    Err(e) => {
                        if let Some(reason) = e.stop_reason() {
                            self.stop.raise(reason);
                            break;
                        }
                        if !outage {
                            report_unavailable(&e);
                            outage = true;
                        }
                        self.idle(self.settings.poll_interval).await;
                        if self.window_due() {
                            self.flush().await;
                        }
                        continue;
                    }
                }
            }
            let Some(active) = channel.as_mut() else {
                continue;
            };

            if !warmed_up {
                warmed_up = true;
                log::info!(
                    "Waiting {:?} before the first pass over {} queue masks",
                    self.settings.initial_delay,
                    self.settings.masks.len()
                );
                let wait = self.settings.initial_delay;
                if let Err(e) = self.sleep(client, active, wait).await {
                    self.recover(client, &mut channel, e).await;
                }
                continue;
            }

            self.set_state(MonitorState::Polling);
            let result = self.poll(client, active, &local_queue_manager).await;
            self.flush_if_due().await;
            if let Err(e) = result {
                self.recover(client, &mut channel, e).await;
                continue;
            }
            if self.stop.is_raised() {
                break;
            }

            let wait = self.settings.poll_interval;
            if let Err(e) = self.sleep(client, active, wait).await {
                self.recover(client, &mut channel, e).await;
            }
        }

        self.set_state(MonitorState::Draining);
        if let Some(reason) = self.stop.reason() {
            MonitorEvent::Stopping(reason).emit();
        }
        if self.metrics.polls_in_window() > 0 || self.windows_written == 0 {
            self.flush().await;
        }
        if let Err(e) = self.output.close().await {
            log::error!("Closing statistics output failed: {}", e);
        }
        if let Some(open) = channel.take() {
            close_channel(client, &open).await;
        }
        if let Err(e) = client.disconnect().await {
            log::debug!("Disconnect from {} failed: {}", local_queue_manager, e);
        }
        self.set_state(MonitorState::Terminated);

        let mut summary = std::mem::take(&mut self.summary);
        summary.stop_reason = self.stop.reason();
        Ok(summary)
    }

    async fn open_channel<C>(&self, client: &mut C) -> Result<AdminChannel>
    where
        C: QueueClient + ?Sized,
    {
        let admin_queue = &self.settings.admin_queue;
        let control_queue = &self.settings.control_queue;

        let admin = client
            .open(admin_queue, OpenOptions::output())
            .await
            .map_err(|e| Error::queue("open", admin_queue.as_str(), e))?;
        let control = match client.open(control_queue, OpenOptions::exclusive_input()).await {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(close_err) = client.close(admin).await {
                    log::debug!("Closing {} failed: {}", admin_queue, close_err);
                }
                return Err(Error::queue("open", control_queue.as_str(), e));
            }
        };

        log::debug!("Opened {} and {}", admin_queue, control_queue);
        Ok(AdminChannel::new(
            admin_queue.clone(),
            admin,
            control_queue.clone(),
            control,
            self.settings.reply_wait,
            self.settings.buffer_size,
        ))
    }

    /// Waits on the control queue for a stop message for up to `wait`.
    async fn sleep<C>(
        &self,
        client: &mut C,
        channel: &AdminChannel,
        wait: Duration,
    ) -> Result<()>
    where
        C: QueueClient + ?Sized,
    {
        self.set_state(MonitorState::Sleeping);
        let options = GetOptions::waiting(wait).matching(STOP_CORREL_ID);
        let mut buffer_len = channel.buffer_len();
        let stop = self.stop.clone();

        let received = tokio::select! {
            result = get_with_resize(client, channel.reply_handle(), &options, &mut buffer_len) => result,
            _ = stop.raised() => return Ok(()),
        };

        match received {
            Ok(_) => {
                log::info!("Stop message received on {}", channel.reply_queue());
                self.stop.raise(StopReason::Requested);
                Ok(())
            }
            Err(e) if e.is_no_message() => Ok(()),
            Err(e) => Err(Error::ControlQueue {
                operation: "get",
                object: channel.reply_queue().to_string(),
                source: e,
            }),
        }
    }

    /// Timer sleep used while the control queue cannot be opened.
    async fn idle(&self, wait: Duration) {
        self.set_state(MonitorState::Sleeping);
        let stop = self.stop.clone();
        tokio::select! {
            _ = sleep(wait) => {}
            _ = stop.raised() => {}
        }
    }

    /// Handles an error that ended a pass or a sleep early.
    async fn recover<C>(&self, client: &mut C, channel: &mut Option<AdminChannel>, error: Error)
    where
        C: QueueClient + ?Sized,
    {
        if let Some(reason) = error.stop_reason() {
            self.stop.raise(reason);
            return;
        }
        report_failure(&error);

        // Reopen both queues on the next pass.
        if matches!(error, Error::ControlQueue { .. }) {
            if let Some(open) = channel.take() {
                close_channel(client, &open).await;
            }
            self.idle(self.settings.poll_interval).await;
        }
    }

    async fn poll<C>(
        &self,
        client: &mut C,
        channel: &mut AdminChannel,
        local_queue_manager: &str,
    ) -> Result<()>
    where
        C: QueueClient + ?Sized,
    {
        let started = Instant::now();
        let mut result = Ok(());

        for mask in &self.settings.masks {
            if self.stop.is_raised() {
                break;
            }
            if let Err(e) = self
                .check_mask(client, channel, mask, local_queue_manager)
                .await
            {
                result = Err(e);
                break;
            }
        }

        let elapsed = started.elapsed();
        self.metrics.record_poll(elapsed);
        log::debug!("Pass finished in {:?}", elapsed);
        result
    }

    /// Inquires one mask and handles every queue it matches. Returns only
    /// errors that end the pass.
    async fn check_mask<C>(
        &self,
        client: &mut C,
        channel: &mut AdminChannel,
        mask: &str,
        local_queue_manager: &str,
    ) -> Result<()>
    where
        C: QueueClient + ?Sized,
    {
        let request = pcf::inquire_local_queues(mask, &self.settings.cluster);
        let snapshots = match self.inquire_local(client, channel, mask, &request).await {
            Ok(snapshots) => snapshots,
            Err(e) if e.is_fatal() || matches!(e, Error::ControlQueue { .. }) => return Err(e),
            Err(e) => {
                report_failure(&e);
                return Ok(());
            }
        };

        if snapshots.is_empty() {
            MonitorEvent::NoQueuesMatched {
                mask: mask.to_string(),
            }
            .emit();
        }

        for snapshot in &snapshots {
            if self.stop.is_raised() {
                break;
            }
            self.handle_queue(client, channel, snapshot, local_queue_manager)
                .await?;
        }
        Ok(())
    }

    async fn inquire_local<C>(
        &self,
        client: &mut C,
        channel: &mut AdminChannel,
        mask: &str,
        request: &PcfMessage,
    ) -> Result<Vec<QueueSnapshot>>
    where
        C: QueueClient + ?Sized,
    {
        let mut pending = channel.send(client, "inquire queue", mask, request).await?;
        let mut snapshots = Vec::new();

        while let Some(reply) = channel.next_reply(client, &mut pending).await? {
            match reply.status() {
                ResponseStatus::Ok => match QueueSnapshot::try_from(&reply) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => log::warn!("Ignoring queue reply for {}: {}", mask, e),
                },
                ResponseStatus::NotFound => {}
                ResponseStatus::Rejected | ResponseStatus::Failed => MonitorEvent::CommandFailed {
                    command: pending.command(),
                    object: mask.to_string(),
                    completion: reply.completion(),
                    reason: reply.reason(),
                }
                .emit(),
            }
        }
        Ok(snapshots)
    }

    async fn handle_queue<C>(
        &self,
        client: &mut C,
        channel: &mut AdminChannel,
        snapshot: &QueueSnapshot,
        local_queue_manager: &str,
    ) -> Result<()>
    where
        C: QueueClient + ?Sized,
    {
        self.metrics.increment_queues_checked();
        let classification = classifier::plan(snapshot, &self.settings.policy);
        log::debug!(
            "{} is {} (IPPROCS={}, CLWLPRTY={}, CURDEPTH={})",
            snapshot.name,
            classification.state,
            snapshot.open_input_count,
            snapshot.priority,
            snapshot.depth
        );

        if classification.state.is_transition() {
            self.metrics.increment_state_changes();
            MonitorEvent::StateTransition {
                queue: snapshot.name.clone(),
                state: classification.state,
                open_input_count: snapshot.open_input_count,
                priority: snapshot.priority,
            }
            .emit();
        }

        if !classification.delta.is_empty() {
            let request = pcf::change_queue(&snapshot.name, &classification.delta);
            match self.change(client, channel, &snapshot.name, &request).await {
                Ok(true) => MonitorEvent::ConfigurationChanged {
                    queue: snapshot.name.clone(),
                    delta: classification.delta,
                }
                .emit(),
                Ok(false) => {}
                Err(e) if e.is_fatal() || matches!(e, Error::ControlQueue { .. }) => {
                    return Err(e)
                }
                Err(e) => report_failure(&e),
            }
        }

        if self.settings.migrate
            && !classification.state.is_effectively_active()
            && snapshot.depth > 0
        {
            self.drain(client, channel, snapshot, local_queue_manager)
                .await?;
        }
        Ok(())
    }

    /// Sends a change request; `Ok(false)` when the command server refused it.
    async fn change<C>(
        &self,
        client: &mut C,
        channel: &mut AdminChannel,
        queue: &str,
        request: &PcfMessage,
    ) -> Result<bool>
    where
        C: QueueClient + ?Sized,
    {
        let mut pending = channel.send(client, "change queue", queue, request).await?;
        let mut accepted = true;
        while let Some(reply) = channel.next_reply(client, &mut pending).await? {
            if reply.status() != ResponseStatus::Ok {
                accepted = false;
                MonitorEvent::CommandFailed {
                    command: pending.command(),
                    object: queue.to_string(),
                    completion: reply.completion(),
                    reason: reply.reason(),
                }
                .emit();
            }
        }
        Ok(accepted)
    }

    /// Moves the backlog of an inactive queue toward an active instance.
    async fn drain<C>(
        &self,
        client: &mut C,
        channel: &mut AdminChannel,
        snapshot: &QueueSnapshot,
        local_queue_manager: &str,
    ) -> Result<()>
    where
        C: QueueClient + ?Sized,
    {
        let found =
            locator::find_active_alternate(client, channel, &snapshot.name, local_queue_manager)
                .await?;
        if !found {
            MonitorEvent::NoActiveAlternate {
                queue: snapshot.name.clone(),
                depth: snapshot.depth,
            }
            .emit();
            return Ok(());
        }

        let job = MigrationJob::new(
            snapshot.name.as_str(),
            snapshot.depth,
            self.settings.max_migrate_per_pass,
        );
        let settings = MigrationSettings {
            local_queue_manager: local_queue_manager.to_string(),
            batch_size: self.settings.batch_size,
            buffer_len: channel.buffer_len().max(self.settings.buffer_size),
        };
        let outcome = migrator::migrate(client, &job, &settings, &self.stop).await;
        self.metrics.record_migration(outcome.migrated());

        if let Some(error) = outcome.error() {
            if error.is_fatal() {
                self.stop.raise(StopReason::from_client_error(error));
            }
        }
        MonitorEvent::MigrationFinished {
            queue: job.queue,
            ceiling: job.ceiling,
            outcome,
        }
        .emit();
        Ok(())
    }

    async fn flush_if_due(&mut self) {
        if self.settings.diagnostics || self.window_due() {
            self.flush().await;
        }
    }

    /// Whether the statistics window has run its time or its poll count.
    fn window_due(&self) -> bool {
        self.metrics.window_elapsed() >= self.settings.stats_interval
            || self
                .settings
                .stats_every_polls
                .is_some_and(|every| self.metrics.polls_in_window() >= every)
    }

    async fn flush(&mut self) {
        let window = self.metrics.take_window();
        self.summary.absorb(&window);
        self.windows_written += 1;
        MonitorEvent::Statistics(window.clone()).emit();
        if let Err(e) = self.output.write(&window).await {
            log::error!("Writing statistics failed: {}", e);
        }
    }
}

async fn close_channel<C>(client: &mut C, channel: &AdminChannel)
where
    C: QueueClient + ?Sized,
{
    for (queue, handle) in [
        (channel.reply_queue(), channel.reply_handle()),
        (channel.admin_queue(), channel.admin_handle()),
    ] {
        if let Err(e) = client.close(handle).await {
            log::debug!("Closing {} failed: {}", queue, e);
        }
    }
}

fn report_unavailable(error: &Error) {
    match error {
        Error::Queue { object, source, .. } => MonitorEvent::ResourceUnavailable {
            queue: object.clone(),
            reason: source.reason(),
        }
        .emit(),
        other => log::warn!("{}", other),
    }
}

fn report_failure(error: &Error) {
    match error {
        Error::Queue {
            operation,
            object,
            source,
        }
        | Error::ControlQueue {
            operation,
            object,
            source,
        } => MonitorEvent::OperationFailed {
            operation: *operation,
            object: object.clone(),
            completion: source.completion(),
            reason: source.reason(),
        }
        .emit(),
        other => log::error!("{}", other),
    }
}
