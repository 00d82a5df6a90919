use crate::config::schema::{self, validate_queue_mask, MonitorConfig, OutputConfig};
use crate::error::{Error, Result};
use crate::output::{
    console::ConsoleOutput, csv::CsvOutput, json::JsonOutput, sqlite::SqliteOutput, OutputHandler,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

/// Prefix of environment variables that override file settings,
/// e.g. `CLUSMON_POLL_INTERVAL_SECS=60`.
pub const ENV_PREFIX: &str = "CLUSMON";

#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    queue_manager: Option<String>,
    cluster: Option<String>,
    poll_interval_secs: Option<u64>,
    initial_delay_secs: Option<u64>,
    reply_wait_ms: Option<u64>,
    stats_interval_secs: Option<u64>,
    diagnostics: Option<bool>,
    migrate: Option<bool>,
    batch_size: Option<u32>,
    active_priority: Option<i32>,
    switch_use_queue: Option<bool>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<MonitorConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        let mut config = Self::load_with_inheritance(path, &mut visited)?;
        Self::apply_env_overrides(&mut config)?;
        config.validate().map_err(Error::Validation)?;
        Ok(config)
    }

    fn load_with_inheritance(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<MonitorConfig> {
        let path = fs::canonicalize(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let mut config = Self::load_file(&path)?;
        let base_dir = path
            .parent()
            .ok_or_else(|| {
                Error::Config(format!(
                    "Cannot determine parent directory for {}",
                    path.display()
                ))
            })?
            .to_path_buf();

        // Relative queue files are relative to the file that names them.
        if let Some(queue_file) = &config.queue_file {
            let queue_file = Path::new(queue_file);
            if queue_file.is_relative() {
                config.queue_file = Some(base_dir.join(queue_file).display().to_string());
            }
        }

        let final_config = if let Some(parent_path_str) = &config.extends {
            let parent_path = base_dir.join(parent_path_str);
            let parent_config = Self::load_with_inheritance(&parent_path, visited)?;
            Self::merge_configs(parent_config, config)
        } else {
            config
        };

        Ok(final_config)
    }

    fn load_file(path: &Path) -> Result<MonitorConfig> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let config: MonitorConfig = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some("yaml") | Some("yml") => {
                let config: MonitorConfig = serde_yaml::from_str(&content)?;
                Ok(config)
            }
            Some("toml") => {
                let config: MonitorConfig = toml::from_str(&content)?;
                Ok(config)
            }
            _ => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            ))),
        }
    }

    /// Child values win wherever they differ from the schema default.
    fn merge_configs(mut parent: MonitorConfig, child: MonitorConfig) -> MonitorConfig {
        if !child.queue_manager.is_empty() {
            parent.queue_manager = child.queue_manager;
        }
        if !child.cluster.is_empty() {
            parent.cluster = child.cluster;
        }
        if !child.queues.is_empty() {
            parent.queues = child.queues;
        }
        if child.queue_file.is_some() {
            parent.queue_file = child.queue_file;
        }
        if child.admin_queue != "SYSTEM.ADMIN.COMMAND.QUEUE" {
            parent.admin_queue = child.admin_queue;
        }
        if child.control_queue != "SYSTEM.CLUSTER.MONITOR.QUEUE" {
            parent.control_queue = child.control_queue;
        }
        if child.poll_interval_secs != schema::default_poll_interval() {
            parent.poll_interval_secs = child.poll_interval_secs;
        }
        if child.initial_delay_secs != schema::default_initial_delay() {
            parent.initial_delay_secs = child.initial_delay_secs;
        }
        if child.reply_wait_ms != schema::default_reply_wait() {
            parent.reply_wait_ms = child.reply_wait_ms;
        }
        if child.stats_interval_secs != schema::default_stats_interval() {
            parent.stats_interval_secs = child.stats_interval_secs;
        }
        if child.stats_every_polls.is_some() {
            parent.stats_every_polls = child.stats_every_polls;
        }
        if child.diagnostics {
            parent.diagnostics = true;
        }
        if !child.migrate {
            parent.migrate = false;
        }
        if child.batch_size != schema::default_batch_size() {
            parent.batch_size = child.batch_size;
        }
        if child.max_migrate_per_pass.is_some() {
            parent.max_migrate_per_pass = child.max_migrate_per_pass;
        }
        if child.active_priority != schema::default_active_priority() {
            parent.active_priority = child.active_priority;
        }
        if child.switch_use_queue {
            parent.switch_use_queue = true;
        }
        if child.preferred_use_queue != schema::default_preferred_use_queue() {
            parent.preferred_use_queue = child.preferred_use_queue;
        }
        if child.buffer_size != schema::default_buffer_size() {
            parent.buffer_size = child.buffer_size;
        }
        if child.output.is_some() {
            parent.output = child.output;
        }

        parent.extends = None;
        parent
    }

    fn apply_env_overrides(config: &mut MonitorConfig) -> Result<()> {
        let overrides: EnvOverrides = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        if let Some(value) = overrides.queue_manager {
            config.queue_manager = value;
        }
        if let Some(value) = overrides.cluster {
            config.cluster = value;
        }
        if let Some(value) = overrides.poll_interval_secs {
            config.poll_interval_secs = value;
        }
        if let Some(value) = overrides.initial_delay_secs {
            config.initial_delay_secs = value;
        }
        if let Some(value) = overrides.reply_wait_ms {
            config.reply_wait_ms = value;
        }
        if let Some(value) = overrides.stats_interval_secs {
            config.stats_interval_secs = value;
        }
        if let Some(value) = overrides.diagnostics {
            config.diagnostics = value;
        }
        if let Some(value) = overrides.migrate {
            config.migrate = value;
        }
        if let Some(value) = overrides.batch_size {
            config.batch_size = value;
        }
        if let Some(value) = overrides.active_priority {
            config.active_priority = value;
        }
        if let Some(value) = overrides.switch_use_queue {
            config.switch_use_queue = value;
        }
        Ok(())
    }

    /// All queue names and masks to monitor, in configuration order, without
    /// duplicates.
    pub fn queue_masks(config: &MonitorConfig) -> Result<Vec<String>> {
        let mut masks = config.queues.clone();
        if let Some(path) = &config.queue_file {
            masks.extend(Self::read_queue_file(Path::new(path))?);
        }

        let mut seen = HashSet::new();
        masks.retain(|mask| seen.insert(mask.clone()));
        if masks.is_empty() {
            return Err(Error::Config("No queues to monitor".to_string()));
        }
        Ok(masks)
    }

    fn read_queue_file(path: &Path) -> Result<Vec<String>> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let mut masks = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            validate_queue_mask(line).map_err(|e| {
                Error::Config(format!(
                    "{}:{}: invalid queue name '{}' ({})",
                    path.display(),
                    number + 1,
                    line,
                    e.code
                ))
            })?;
            masks.push(line.to_string());
        }
        Ok(masks)
    }

    pub async fn create_output(
        config: &MonitorConfig,
        multi: Option<Arc<indicatif::MultiProgress>>,
    ) -> Result<Box<dyn OutputHandler>> {
        let handler: Box<dyn OutputHandler> = match &config.output {
            Some(OutputConfig::Console) | None => Box::new(ConsoleOutput::new(multi)),
            Some(OutputConfig::Json { path }) => Box::new(JsonOutput::new(PathBuf::from(path))?),
            Some(OutputConfig::Csv { path }) => Box::new(CsvOutput::new(PathBuf::from(path))?),
            Some(OutputConfig::Sqlite { path, table }) => {
                Box::new(SqliteOutput::new(PathBuf::from(path), table.clone()).await?)
            }
        };
        Ok(handler)
    }
}
