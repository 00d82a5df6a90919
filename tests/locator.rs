mod common;

use clusmon::admin::AdminChannel;
use clusmon::client::{OpenOptions, QueueClient};
use clusmon::locator::find_active_alternate;
use clusmon::pcf::{self, PcfError};
use clusmon::sim::{QueueSpec, Scenario, SimulatedCluster};
use clusmon::Error;
use common::{ADMIN_QUEUE, CONTROL_QUEUE};
use std::time::Duration;

async fn open(scenario: Scenario) -> (SimulatedCluster, AdminChannel) {
    let mut sim = SimulatedCluster::new(scenario);
    sim.connect("QM1").await.unwrap();
    let admin = sim.open(ADMIN_QUEUE, OpenOptions::output()).await.unwrap();
    let control = sim
        .open(CONTROL_QUEUE, OpenOptions::exclusive_input())
        .await
        .unwrap();
    let channel = AdminChannel::new(
        ADMIN_QUEUE,
        admin,
        CONTROL_QUEUE,
        control,
        Duration::from_secs(10),
        4096,
    );
    (sim, channel)
}

fn orders() -> Scenario {
    Scenario::new("QM1").with_queue(QueueSpec::clustered("APP.ORDERS", "INV").priority(0))
}

#[tokio::test(start_paused = true)]
async fn remote_instance_with_priority_is_found() {
    let (mut sim, mut channel) = open(
        orders()
            .with_remote("APP.ORDERS", "QM2", 2)
            .with_remote("APP.ORDERS", "QM3", 0)
            .with_remote("APP.ORDERS", "QM4", 5),
    )
    .await;

    let found = find_active_alternate(&mut sim, &mut channel, "APP.ORDERS", "QM1")
        .await
        .unwrap();

    assert!(found);
    // Every reply is read even after the first match.
    assert_eq!(sim.depth(CONTROL_QUEUE), Some(0));
}

#[tokio::test(start_paused = true)]
async fn local_instance_alone_is_not_an_alternate() {
    let mut scenario = Scenario::new("QM1")
        .with_queue(QueueSpec::clustered("APP.ORDERS", "INV").priority(3));
    scenario.remote_instances.clear();
    let (mut sim, mut channel) = open(scenario).await;

    let found = find_active_alternate(&mut sim, &mut channel, "APP.ORDERS", "QM1")
        .await
        .unwrap();

    assert!(!found);
}

#[tokio::test(start_paused = true)]
async fn inactive_remote_instances_are_not_alternates() {
    let (mut sim, mut channel) = open(orders().with_remote("APP.ORDERS", "QM2", 0)).await;

    let found = find_active_alternate(&mut sim, &mut channel, "APP.ORDERS", "QM1")
        .await
        .unwrap();

    assert!(!found);
}

#[tokio::test(start_paused = true)]
async fn unknown_queue_is_not_found() {
    let (mut sim, mut channel) = open(orders()).await;

    let found = find_active_alternate(&mut sim, &mut channel, "APP.NOWHERE", "QM1")
        .await
        .unwrap();

    assert!(!found);
    assert_eq!(sim.depth(CONTROL_QUEUE), Some(0));
}

#[tokio::test(start_paused = true)]
async fn missing_reply_counts_as_not_found() {
    let mut scenario = orders().with_remote("APP.ORDERS", "QM2", 1);
    scenario.command_server_running = false;
    let (mut sim, mut channel) = open(scenario).await;

    let found = find_active_alternate(&mut sim, &mut channel, "APP.ORDERS", "QM1")
        .await
        .unwrap();

    assert!(!found);
}

#[tokio::test(start_paused = true)]
async fn broken_connection_is_propagated() {
    let mut scenario = orders().with_remote("APP.ORDERS", "QM2", 1);
    scenario.command_server_running = false;
    scenario.break_connection_after_waits = Some(1);
    let (mut sim, mut channel) = open(scenario).await;

    let err = find_active_alternate(&mut sim, &mut channel, "APP.ORDERS", "QM1")
        .await
        .unwrap_err();

    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn replies_are_matched_to_their_request() {
    let (mut sim, mut channel) = open(orders().with_remote("APP.ORDERS", "QM2", 1)).await;

    let mut first = channel
        .send(&mut sim, "inquire cluster queue", "APP.ORDERS", &pcf::inquire_cluster_instances("APP.ORDERS"))
        .await
        .unwrap();
    let mut second = channel
        .send(&mut sim, "inquire queue", "APP.*", &pcf::inquire_local_queues("APP.*", "INV"))
        .await
        .unwrap();

    let mut local = 0;
    while let Some(reply) = channel.next_reply(&mut sim, &mut second).await.unwrap() {
        assert_eq!(reply.string(pcf::param::CLUSTER_NAME), Some("INV"));
        local += 1;
    }
    let mut owners = Vec::new();
    while let Some(reply) = channel.next_reply(&mut sim, &mut first).await.unwrap() {
        owners.push(reply.string(pcf::param::CLUSTER_Q_MGR_NAME).unwrap_or_default().to_string());
    }

    assert_eq!(local, 1);
    assert_eq!(owners, vec!["QM1", "QM2"]);
    assert!(first.is_done() && second.is_done());
    assert_eq!(sim.commands_processed(), 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_request_is_rejected_before_sending() {
    let (mut sim, channel) = open(orders()).await;
    let mask = "Q".repeat(5000);

    let err = channel
        .send(&mut sim, "inquire queue", &mask, &pcf::inquire_local_queues(&mask, "INV"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Protocol {
            source: PcfError::RequestTooLarge { limit: 4096, .. },
            ..
        }
    ));
    assert_eq!(sim.commands_processed(), 0);
}
