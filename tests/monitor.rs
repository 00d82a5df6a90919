mod common;

use clusmon::classifier::{ClassifierPolicy, ConfigurationDelta};
use clusmon::client::QueueClient;
use clusmon::monitor::{MonitorEngine, MonitorState};
use clusmon::pcf::UseQueuePolicy;
use clusmon::sim::{QueueSpec, Scenario, SimulatedCluster};
use clusmon::{Error, Reason, StopReason};
use common::{settings, CapturedOutput, CONTROL_QUEUE};
use std::time::Duration;

fn orders(spec: QueueSpec) -> Scenario {
    Scenario::new("QM1").with_queue(spec)
}

#[tokio::test(start_paused = true)]
async fn inactive_queue_is_demoted_and_drained() {
    let mut scenario = orders(
        QueueSpec::clustered("APP.ORDERS", "INV")
            .consumers(0)
            .priority(1)
            .depth(10),
    )
    .with_remote("APP.ORDERS", "QM2", 1);
    scenario.stop_after_waits = Some(2);
    let mut sim = SimulatedCluster::new(scenario);
    let output = CapturedOutput::default();
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), output.boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(summary.queue_manager, "QM1");
    assert_eq!(summary.polls, 2);
    assert_eq!(summary.queues_checked, 2);
    assert_eq!(summary.state_changes, 1);
    assert_eq!(summary.migration_jobs, 1);
    assert_eq!(summary.messages_migrated, 10);
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));

    // Only the first pass changes anything; the second finds it Inactive.
    assert_eq!(
        sim.changes(),
        &[(
            "APP.ORDERS".to_string(),
            ConfigurationDelta {
                priority: Some(0),
                use_queue: None
            }
        )]
    );
    assert_eq!(sim.priority("APP.ORDERS"), Some(0));
    assert_eq!(sim.depth("APP.ORDERS"), Some(0));
    assert_eq!(sim.commit_log(), &[10]);
    assert!(sim.routed().iter().all(|r| r.owner == "QM2"));
    assert_eq!(sim.depth(CONTROL_QUEUE), Some(0));
    assert!(!sim.is_connected());

    let windows = output.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].polls, 2);
    assert_eq!(windows[0].messages_migrated, 10);
    assert!(*output.closed.lock().unwrap());
    assert_eq!(*engine.watch_state().borrow(), MonitorState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn queue_with_consumers_is_promoted_and_kept() {
    let mut scenario = orders(
        QueueSpec::clustered("APP.ORDERS", "INV")
            .consumers(2)
            .priority(0)
            .depth(5),
    )
    .with_remote("APP.ORDERS", "QM2", 1);
    scenario.stop_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut engine = MonitorEngine::new(settings(&["APP.ORDERS"]), CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(summary.state_changes, 1);
    assert_eq!(summary.migration_jobs, 0);
    assert_eq!(sim.priority("APP.ORDERS"), Some(1));
    assert_eq!(sim.depth("APP.ORDERS"), Some(5));
}

#[tokio::test(start_paused = true)]
async fn configured_active_priority_is_applied() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1));
    scenario.stop_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.policy.active_priority = 4;
    let mut engine = MonitorEngine::new(settings, CapturedOutput::default().boxed());

    engine.run(&mut sim).await.unwrap();

    assert_eq!(sim.priority("APP.ORDERS"), Some(4));
}

#[tokio::test(start_paused = true)]
async fn use_queue_follows_activity_when_switching() {
    let mut scenario = Scenario::new("QM1")
        .with_queue(
            QueueSpec::clustered("APP.IDLE", "INV")
                .consumers(0)
                .priority(0)
                .use_queue(UseQueuePolicy::Local),
        )
        .with_queue(
            QueueSpec::clustered("APP.BUSY", "INV")
                .consumers(3)
                .priority(1)
                .use_queue(UseQueuePolicy::Any),
        );
    scenario.stop_after_waits = Some(2);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.policy = ClassifierPolicy {
        switch_use_queue: true,
        ..ClassifierPolicy::default()
    };
    let mut engine = MonitorEngine::new(settings, CapturedOutput::default().boxed());

    engine.run(&mut sim).await.unwrap();

    assert_eq!(sim.use_queue("APP.IDLE"), Some(UseQueuePolicy::Any));
    assert_eq!(sim.use_queue("APP.BUSY"), Some(UseQueuePolicy::Local));
    // Steady state after the first pass.
    assert_eq!(sim.changes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn backlog_stays_without_an_active_alternate() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").depth(10))
        .with_remote("APP.ORDERS", "QM2", 0);
    scenario.stop_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(summary.migration_jobs, 0);
    assert_eq!(sim.depth("APP.ORDERS"), Some(10));
    assert!(sim.routed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn migration_can_be_disabled() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").depth(10))
        .with_remote("APP.ORDERS", "QM2", 1);
    scenario.stop_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.migrate = false;
    let mut engine = MonitorEngine::new(settings, CapturedOutput::default().boxed());

    engine.run(&mut sim).await.unwrap();

    assert_eq!(sim.depth("APP.ORDERS"), Some(10));
}

#[tokio::test(start_paused = true)]
async fn per_pass_cap_spreads_migration_over_passes() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").depth(25))
        .with_remote("APP.ORDERS", "QM2", 1);
    scenario.stop_after_waits = Some(2);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.max_migrate_per_pass = Some(20);
    let mut engine = MonitorEngine::new(settings, CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(sim.commit_log(), &[20, 5]);
    assert_eq!(summary.migration_jobs, 2);
    assert_eq!(summary.messages_migrated, 25);
}

#[tokio::test(start_paused = true)]
async fn broken_connection_stops_the_monitor() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1).priority(1));
    scenario.break_connection_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(
        summary.stop_reason,
        Some(StopReason::ConnectionLost(Reason::CONNECTION_BROKEN))
    );
    assert_eq!(summary.polls, 1);
}

#[tokio::test(start_paused = true)]
async fn unreadable_control_queue_stops_the_monitor() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV"));
    scenario.get_inhibited = vec![CONTROL_QUEUE.to_string()];
    let mut sim = SimulatedCluster::new(scenario);
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(
        summary.stop_reason,
        Some(StopReason::ControlQueueUnusable(Reason::GET_INHIBITED))
    );
    assert_eq!(summary.queues_checked, 0);
}

#[tokio::test(start_paused = true)]
async fn standby_waits_for_the_control_queue() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1));
    scenario.held_exclusive = vec![CONTROL_QUEUE.to_string()];
    scenario.release_holds_after_secs = Some(800);
    scenario.stop_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), CapturedOutput::default().boxed());

    let started = tokio::time::Instant::now();
    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(sim.failed_opens(), 3);
    assert_eq!(summary.polls, 1);
    assert_eq!(sim.priority("APP.ORDERS"), Some(1));
    assert!(started.elapsed() >= Duration::from_secs(900));
}

#[tokio::test(start_paused = true)]
async fn interrupt_ends_the_run_during_sleep() {
    let sim_scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1).priority(1));
    let mut sim = SimulatedCluster::new(sim_scenario);
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), CapturedOutput::default().boxed());

    let stop = engine.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1000)).await;
        stop.raise(StopReason::Interrupted);
    });
    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
    assert_eq!(summary.polls, 4);
    assert_eq!(sim.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_message_during_initial_delay_skips_polling() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1));
    scenario.stop_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.initial_delay = Duration::from_secs(30);
    let mut engine = MonitorEngine::new(settings, CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(summary.polls, 0);
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));
    assert_eq!(sim.priority("APP.ORDERS"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn replies_larger_than_the_buffer_are_read() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1));
    scenario.stop_after_waits = Some(1);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.buffer_size = 64;
    let mut engine = MonitorEngine::new(settings, CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(summary.queues_checked, 1);
    assert_eq!(sim.priority("APP.ORDERS"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn silent_command_server_skips_the_pass() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1));
    scenario.command_server_running = false;
    scenario.stop_after_waits = Some(2);
    let mut sim = SimulatedCluster::new(scenario);
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), CapturedOutput::default().boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    assert_eq!(summary.polls, 1);
    assert_eq!(summary.queues_checked, 0);
    assert_eq!(summary.stop_reason, Some(StopReason::Requested));
}

#[tokio::test(start_paused = true)]
async fn statistics_flush_on_poll_count() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1).priority(1));
    scenario.stop_after_waits = Some(3);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.stats_every_polls = Some(1);
    let output = CapturedOutput::default();
    let mut engine = MonitorEngine::new(settings, output.boxed());

    let summary = engine.run(&mut sim).await.unwrap();

    let windows = output.windows();
    assert_eq!(summary.polls, 3);
    assert_eq!(windows.len(), 3);
    assert!(windows.iter().all(|w| w.polls == 1 && w.queues_checked == 1));
}

#[tokio::test(start_paused = true)]
async fn statistics_flush_when_the_window_elapses() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1).priority(1));
    scenario.stop_after_waits = Some(4);
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.stats_interval = Duration::from_secs(600);
    let output = CapturedOutput::default();
    let mut engine = MonitorEngine::new(settings, output.boxed());

    engine.run(&mut sim).await.unwrap();

    // Passes at 0s, 300s, 600s and 900s; the window closes after the third.
    let polls: Vec<u64> = output.windows().iter().map(|w| w.polls).collect();
    assert_eq!(polls, vec![3, 1]);
}

#[tokio::test(start_paused = true)]
async fn standby_still_closes_statistics_windows() {
    let mut scenario = orders(QueueSpec::clustered("APP.ORDERS", "INV").consumers(1));
    scenario.held_exclusive = vec![CONTROL_QUEUE.to_string()];
    let mut sim = SimulatedCluster::new(scenario);
    let mut settings = settings(&["APP.*"]);
    settings.stats_interval = Duration::from_secs(600);
    let output = CapturedOutput::default();
    let mut engine = MonitorEngine::new(settings, output.boxed());

    let stop = engine.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1300)).await;
        stop.raise(StopReason::Interrupted);
    });
    let summary = engine.run(&mut sim).await.unwrap();

    // Open attempts at 0s, 300s, 600s, 900s and 1200s; windows close at 600s and 1200s.
    let windows = output.windows();
    assert_eq!(windows.len(), 2);
    assert!(windows.iter().all(|w| w.polls == 0));
    assert_eq!(summary.polls, 0);
    assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
}

#[tokio::test(start_paused = true)]
async fn failed_connect_is_an_error() {
    let mut sim = SimulatedCluster::new(Scenario::new("QM9"));
    let mut engine = MonitorEngine::new(settings(&["APP.*"]), CapturedOutput::default().boxed());

    let err = engine.run(&mut sim).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Queue {
            operation: "connect",
            ..
        }
    ));
    assert!(!sim.is_connected());
    assert!(sim.disconnect().await.is_err());
}
