use clap::{Parser, Subcommand};
use clusmon::config::ConfigLoader;
use clusmon::metrics::StatisticsSnapshot;
use clusmon::monitor::{MonitorEngine, MonitorSettings, MonitorState};
use clusmon::sim::{Scenario, SimulatedCluster};
use clusmon::StopReason;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "clusmon")]
#[command(version = "0.1.0")]
#[command(about = "Keeps clustered queues advertised according to their consumers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor against a simulated cluster
    Simulate {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the scenario describing the cluster (JSON/YAML)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Show a status spinner (stderr)
        #[arg(short, long, default_value_t = false)]
        progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let multi = Arc::new(indicatif::MultiProgress::new());

    match cli.command {
        Commands::Simulate {
            config,
            scenario,
            progress,
        } => {
            if progress {
                indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger).try_init()?;
            } else {
                let level = logger.filter();
                log::set_boxed_logger(Box::new(logger))?;
                log::set_max_level(level);
            }

            log::info!("Loading config from {:?}", config);
            let config_data = ConfigLoader::load(&config)?;
            let settings = MonitorSettings::from_config(&config_data)?;
            log::info!(
                "Monitoring {} queue masks in cluster {}",
                settings.masks.len(),
                settings.cluster
            );

            let scenario = Scenario::load(&scenario)?;
            let output =
                ConfigLoader::create_output(&config_data, progress.then(|| multi.clone())).await?;
            let mut engine = MonitorEngine::new(settings, Some(output));

            let stop = engine.stop_signal();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Shutting down...");
                    stop.raise(StopReason::Interrupted);
                }
            });

            let mut spinner: Option<ProgressBar> = None;
            let mut _progress_task = None;
            if progress {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
                );
                pb.enable_steady_tick(Duration::from_millis(120));

                let mut metrics_rx = engine.watch_metrics();
                let state_rx = engine.watch_state();
                let pb_clone = pb.clone();
                spinner = Some(pb);
                _progress_task = Some(tokio::spawn(async move {
                    while metrics_rx.changed().await.is_ok() {
                        let snapshot: StatisticsSnapshot = metrics_rx.borrow().clone();
                        let state: MonitorState = *state_rx.borrow();
                        pb_clone.set_message(format!(
                            "{:?} | Polls: {} | Queues: {} | Changes: {} | Migrated: {}",
                            state,
                            snapshot.polls,
                            snapshot.queues_checked,
                            snapshot.state_changes,
                            snapshot.messages_migrated
                        ));
                    }
                }));
            }

            let mut client = SimulatedCluster::new(scenario);
            let result = engine.run(&mut client).await;

            if let Some(task) = _progress_task {
                task.abort();
            }
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }

            let summary = result?;
            println!("\n✅ Monitor Stopped:");
            println!("   Queue Manager: {}", summary.queue_manager);
            println!("   Polls: {}", summary.polls);
            println!("   Queues Checked: {}", summary.queues_checked);
            println!("   State Changes: {}", summary.state_changes);
            println!(
                "   Messages Migrated: {} in {} jobs",
                summary.messages_migrated, summary.migration_jobs
            );
            if let Some(reason) = summary.stop_reason {
                println!("   Stopped: {}", reason);
            }
        }
        Commands::Check { config } => match ConfigLoader::load(&config) {
            Ok(cfg) => match ConfigLoader::queue_masks(&cfg) {
                Ok(masks) => {
                    println!("✅ Config is valid:");
                    println!("   Cluster: {}", cfg.cluster);
                    println!("   Queues: {:?}", masks);
                    println!("   Poll Interval: {}s", cfg.poll_interval_secs);
                    println!("   Migration: {}", if cfg.migrate { "on" } else { "off" });
                }
                Err(e) => {
                    eprintln!("❌ Config error: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("❌ Config error: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
