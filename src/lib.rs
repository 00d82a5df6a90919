pub mod admin;
pub mod classifier;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod locator;
pub mod metrics;
pub mod migrator;
pub mod monitor;
pub mod output;
pub mod pcf;
pub mod sim;

pub use classifier::{ClassifierPolicy, ConfigurationDelta, QueueActivityState};
pub use client::{ClientError, QueueClient, Reason};
pub use context::{StopReason, StopSignal};
pub use error::{Error, Result};
pub use metrics::{MetricsCollector, StatisticsSnapshot};
pub use migrator::{MigrationJob, MigrationOutcome};
pub use monitor::{MonitorEngine, MonitorSettings, MonitorState, RunSummary};
pub use sim::{Scenario, SimulatedCluster};
