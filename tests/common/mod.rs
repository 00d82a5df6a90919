#![allow(dead_code)]

use async_trait::async_trait;
use clusmon::classifier::ClassifierPolicy;
use clusmon::monitor::MonitorSettings;
use clusmon::output::OutputHandler;
use clusmon::StatisticsSnapshot;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ADMIN_QUEUE: &str = "SYSTEM.ADMIN.COMMAND.QUEUE";
pub const CONTROL_QUEUE: &str = "SYSTEM.CLUSTER.MONITOR.QUEUE";

pub fn settings(masks: &[&str]) -> MonitorSettings {
    MonitorSettings {
        queue_manager: "QM1".to_string(),
        cluster: "INV".to_string(),
        masks: masks.iter().map(|m| m.to_string()).collect(),
        admin_queue: ADMIN_QUEUE.to_string(),
        control_queue: CONTROL_QUEUE.to_string(),
        poll_interval: Duration::from_secs(300),
        initial_delay: Duration::ZERO,
        reply_wait: Duration::from_secs(10),
        stats_interval: Duration::from_secs(1800),
        stats_every_polls: None,
        diagnostics: false,
        migrate: true,
        batch_size: 50,
        max_migrate_per_pass: None,
        policy: ClassifierPolicy::default(),
        buffer_size: 4096,
    }
}

/// Keeps every statistics window written by the monitor.
#[derive(Clone, Default)]
pub struct CapturedOutput {
    pub windows: Arc<Mutex<Vec<StatisticsSnapshot>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl CapturedOutput {
    pub fn windows(&self) -> Vec<StatisticsSnapshot> {
        self.windows.lock().unwrap().clone()
    }

    pub fn boxed(&self) -> Option<Box<dyn OutputHandler>> {
        Some(Box::new(self.clone()))
    }
}

#[async_trait]
impl OutputHandler for CapturedOutput {
    async fn write(&mut self, snapshot: &StatisticsSnapshot) -> clusmon::Result<()> {
        self.windows.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn close(&mut self) -> clusmon::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}
