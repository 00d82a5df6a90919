use async_trait::async_trait;
use clusmon::client::{
    ClientResult, GetOptions, Message, ObjectHandle, OpenOptions, PutOptions, PutOutcome,
    QueueClient,
};
use clusmon::context::{StopReason, StopSignal};
use clusmon::migrator::{migrate, MigrationJob, MigrationOutcome, MigrationSettings};
use clusmon::sim::{QueueSpec, Scenario, SimulatedCluster};
use clusmon::Reason;

fn backlog(depth: u32) -> Scenario {
    Scenario::new("QM1")
        .with_queue(QueueSpec::clustered("APP.ORDERS", "INV").depth(depth))
        .with_remote("APP.ORDERS", "QM2", 1)
}

fn settings() -> MigrationSettings {
    MigrationSettings {
        local_queue_manager: "QM1".to_string(),
        batch_size: 50,
        buffer_len: 4096,
    }
}

async fn connected(scenario: Scenario) -> SimulatedCluster {
    let mut sim = SimulatedCluster::new(scenario);
    sim.connect("QM1").await.unwrap();
    sim
}

#[tokio::test]
async fn commits_in_batches_of_fifty() {
    let mut sim = connected(backlog(120)).await;
    let job = MigrationJob::new("APP.ORDERS", 120, None);

    let outcome = migrate(&mut sim, &job, &settings(), &StopSignal::new()).await;

    assert_eq!(outcome, MigrationOutcome::Completed { migrated: 120 });
    assert_eq!(sim.commit_log(), &[50, 50, 20]);
    assert_eq!(sim.routed().len(), 120);
    assert_eq!(sim.depth("APP.ORDERS"), Some(0));
    assert_eq!(sim.open_handles(), 0);
}

#[tokio::test]
async fn moved_messages_keep_their_identity_and_context() {
    let mut sim = connected(backlog(3)).await;
    let job = MigrationJob::new("APP.ORDERS", 3, None);

    migrate(&mut sim, &job, &settings(), &StopSignal::new()).await;

    for routed in sim.routed() {
        assert_eq!(routed.owner, "QM2");
        assert_eq!(routed.message.descriptor.context.user_identifier, "app");
        assert_eq!(routed.message.descriptor.context.put_application, "producer");
        assert!(routed.message.descriptor.persistent);
    }
    let payloads: Vec<_> = sim
        .routed()
        .iter()
        .map(|r| String::from_utf8_lossy(&r.message.payload[..12]).to_string())
        .collect();
    assert_eq!(payloads, vec!["APP.ORDERS#0", "APP.ORDERS#1", "APP.ORDERS#2"]);
}

#[tokio::test]
async fn self_routed_put_halts_at_last_full_batch() {
    for (nth_put, expected) in [(1u32, 0u32), (50, 0), (51, 50), (75, 50), (101, 100)] {
        let mut scenario = backlog(120);
        scenario.self_route_at_put = Some(nth_put);
        let mut sim = connected(scenario).await;
        let job = MigrationJob::new("APP.ORDERS", 120, None);

        let outcome = migrate(&mut sim, &job, &settings(), &StopSignal::new()).await;

        assert_eq!(outcome, MigrationOutcome::Halted { migrated: expected }, "put {}", nth_put);
        assert_eq!(sim.depth("APP.ORDERS"), Some(120 - expected as usize));
        assert_eq!(sim.routed().len(), expected as usize);
        assert_eq!(sim.backouts(), 1);
        assert_eq!(sim.open_handles(), 0);
    }
}

#[tokio::test]
async fn ceiling_bounds_the_job() {
    let mut sim = connected(backlog(120)).await;
    let job = MigrationJob::new("APP.ORDERS", 120, Some(30));

    let outcome = migrate(&mut sim, &job, &settings(), &StopSignal::new()).await;

    assert_eq!(outcome.migrated(), 30);
    assert_eq!(sim.commit_log(), &[30]);
    assert_eq!(sim.depth("APP.ORDERS"), Some(90));
}

#[tokio::test]
async fn fewer_messages_than_the_ceiling_completes() {
    let mut sim = connected(backlog(7)).await;
    let job = MigrationJob::new("APP.ORDERS", 200, None);

    let outcome = migrate(&mut sim, &job, &settings(), &StopSignal::new()).await;

    assert_eq!(outcome, MigrationOutcome::Completed { migrated: 7 });
    assert_eq!(sim.commit_log(), &[7]);
}

#[tokio::test]
async fn raised_stop_backs_out_and_stops() {
    let mut sim = connected(backlog(10)).await;
    let stop = StopSignal::new();
    stop.raise(StopReason::Interrupted);

    let outcome = migrate(&mut sim, &MigrationJob::new("APP.ORDERS", 10, None), &settings(), &stop).await;

    assert_eq!(outcome, MigrationOutcome::Stopped { migrated: 0 });
    assert_eq!(sim.depth("APP.ORDERS"), Some(10));
    assert!(sim.commit_log().is_empty());
    assert_eq!(sim.open_handles(), 0);
}

#[tokio::test]
async fn unknown_queue_fails_on_open() {
    let mut sim = connected(backlog(1)).await;
    let job = MigrationJob::new("APP.MISSING", 5, None);

    let outcome = migrate(&mut sim, &job, &settings(), &StopSignal::new()).await;

    match outcome {
        MigrationOutcome::Failed {
            migrated,
            operation,
            error,
        } => {
            assert_eq!(migrated, 0);
            assert_eq!(operation, "open");
            assert_eq!(error.reason(), Reason::UNKNOWN_OBJECT_NAME);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn inhibited_get_fails_without_losing_messages() {
    let mut scenario = backlog(5);
    scenario.get_inhibited = vec!["APP.ORDERS".to_string()];
    let mut sim = connected(scenario).await;

    let outcome = migrate(&mut sim, &MigrationJob::new("APP.ORDERS", 5, None), &settings(), &StopSignal::new()).await;

    assert!(outcome.is_failure());
    assert_eq!(outcome.error().map(|e| e.reason()), Some(Reason::GET_INHIBITED));
    assert_eq!(sim.depth("APP.ORDERS"), Some(5));
    assert_eq!(sim.backouts(), 1);
}

#[tokio::test]
async fn large_messages_grow_the_buffer() {
    let mut sim = connected(
        Scenario::new("QM1")
            .with_queue(QueueSpec::clustered("APP.ORDERS", "INV").depth(2).message_size(10_000))
            .with_remote("APP.ORDERS", "QM2", 1),
    )
    .await;

    let outcome = migrate(&mut sim, &MigrationJob::new("APP.ORDERS", 2, None), &settings(), &StopSignal::new()).await;

    assert_eq!(outcome, MigrationOutcome::Completed { migrated: 2 });
    assert_eq!(sim.routed()[1].message.payload.len(), 10_000);
}

#[tokio::test]
async fn failed_commit_keeps_only_committed_batches() {
    let mut scenario = backlog(120);
    scenario.fail_commit_at = Some(2);
    let mut sim = connected(scenario).await;

    let outcome = migrate(&mut sim, &MigrationJob::new("APP.ORDERS", 120, None), &settings(), &StopSignal::new()).await;

    match outcome {
        MigrationOutcome::Failed {
            migrated,
            operation,
            error,
        } => {
            assert_eq!(migrated, 50);
            assert_eq!(operation, "commit");
            assert_eq!(error.reason(), Reason::BACKED_OUT);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(sim.commit_log(), &[50]);
    assert_eq!(sim.routed().len(), 50);
    assert_eq!(sim.depth("APP.ORDERS"), Some(70));
    assert_eq!(sim.backouts(), 1);
    assert_eq!(sim.open_handles(), 0);
}

#[tokio::test]
async fn failed_final_commit_backs_out_the_partial_batch() {
    let mut scenario = backlog(70);
    scenario.fail_commit_at = Some(2);
    let mut sim = connected(scenario).await;

    let outcome = migrate(&mut sim, &MigrationJob::new("APP.ORDERS", 70, None), &settings(), &StopSignal::new()).await;

    assert_eq!(outcome.migrated(), 50);
    assert!(outcome.is_failure());
    assert_eq!(sim.commit_log(), &[50]);
    assert_eq!(sim.depth("APP.ORDERS"), Some(20));
    assert_eq!(sim.backouts(), 1);
}

#[tokio::test]
async fn inhibited_put_fails_without_losing_messages() {
    let mut scenario = backlog(10);
    scenario.put_inhibited = vec!["APP.ORDERS".to_string()];
    let mut sim = connected(scenario).await;

    let outcome = migrate(&mut sim, &MigrationJob::new("APP.ORDERS", 10, None), &settings(), &StopSignal::new()).await;

    match outcome {
        MigrationOutcome::Failed {
            migrated,
            operation,
            error,
        } => {
            assert_eq!(migrated, 0);
            assert_eq!(operation, "put");
            assert_eq!(error.reason(), Reason::PUT_INHIBITED);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(sim.routed().is_empty());
    assert_eq!(sim.depth("APP.ORDERS"), Some(10));
    assert_eq!(sim.backouts(), 1);
    assert_eq!(sim.open_handles(), 0);
}

/// Raises the stop signal once a given number of gets have succeeded.
struct StopAfterGets {
    inner: SimulatedCluster,
    stop: StopSignal,
    remaining: u32,
}

#[async_trait]
impl QueueClient for StopAfterGets {
    async fn connect(&mut self, queue_manager: &str) -> ClientResult<String> {
        self.inner.connect(queue_manager).await
    }

    async fn disconnect(&mut self) -> ClientResult<()> {
        self.inner.disconnect().await
    }

    async fn open(&mut self, queue: &str, options: OpenOptions) -> ClientResult<ObjectHandle> {
        self.inner.open(queue, options).await
    }

    async fn close(&mut self, handle: ObjectHandle) -> ClientResult<()> {
        self.inner.close(handle).await
    }

    async fn get(
        &mut self,
        handle: ObjectHandle,
        options: &GetOptions,
        buffer_len: usize,
    ) -> ClientResult<Message> {
        let message = self.inner.get(handle, options, buffer_len).await?;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.stop.raise(StopReason::Interrupted);
        }
        Ok(message)
    }

    async fn put(
        &mut self,
        handle: ObjectHandle,
        message: &Message,
        options: &PutOptions,
    ) -> ClientResult<PutOutcome> {
        self.inner.put(handle, message, options).await
    }

    async fn commit(&mut self) -> ClientResult<()> {
        self.inner.commit().await
    }

    async fn backout(&mut self) -> ClientResult<()> {
        self.inner.backout().await
    }
}

#[tokio::test]
async fn stop_mid_batch_discards_the_open_batch() {
    let stop = StopSignal::new();
    let mut client = StopAfterGets {
        inner: connected(backlog(120)).await,
        stop: stop.clone(),
        remaining: 60,
    };

    let outcome = migrate(&mut client, &MigrationJob::new("APP.ORDERS", 120, None), &settings(), &stop).await;

    assert_eq!(outcome, MigrationOutcome::Stopped { migrated: 50 });
    let sim = &client.inner;
    assert_eq!(sim.commit_log(), &[50]);
    assert_eq!(sim.routed().len(), 50);
    assert_eq!(sim.depth("APP.ORDERS"), Some(70));
    assert_eq!(sim.backouts(), 1);
    assert_eq!(sim.open_handles(), 0);
}
