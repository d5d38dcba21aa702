//! Supervisor lifecycle tests

use std::path::Path;
use std::sync::Arc;

use bucketsync_core::config::{AckPolicy, Config, RetryConfig};
use bucketsync_core::ports::{MessageBroker, StorageConnector};
use bucketsync_sync::{InboundState, Supervisor, SyncError};
use tokio_util::sync::CancellationToken;

use crate::common::{self, FakeBroker, MemoryConnector};

fn supervisor(config: Config, broker: &FakeBroker, shutdown: CancellationToken) -> Supervisor {
    let storage: Arc<dyn StorageConnector> = MemoryConnector::new();
    let broker: Arc<dyn MessageBroker> = Arc::new(broker.clone());
    Supervisor::new(config, storage, broker, shutdown)
}

fn config() -> Config {
    Config {
        remotes: vec![common::remote("store", "store")],
        ..Config::default()
    }
}

#[tokio::test]
async fn test_watch_failure_aborts_start() {
    let dir = tempfile::tempdir().unwrap();
    let broker = FakeBroker::new();
    let mut config = config();
    config.outbound = vec![
        common::outbound_workflow(dir.path(), "*.csv", "s3://store/bucket"),
        common::outbound_workflow(&dir.path().join("missing"), "*.csv", "s3://store/bucket"),
    ];
    config.inbound = vec![common::inbound_workflow(
        "amqp://broker/",
        dir.path(),
        AckPolicy::Always,
    )];

    let result = supervisor(config, &broker, CancellationToken::new()).start().await;

    assert!(matches!(result, Err(SyncError::Watch { .. })));
    // Inbound workflows are not started once an outbound one failed
    assert_eq!(broker.dials(), 0);
}

#[tokio::test]
async fn test_run_stops_all_workflows_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let broker = FakeBroker::new();
    let shutdown = CancellationToken::new();
    let mut config = config();
    config.outbound = vec![common::outbound_workflow(dir.path(), "*.csv", "s3://store/bucket")];
    config.inbound = vec![common::inbound_workflow(
        "amqp://broker/",
        dir.path(),
        AckPolicy::Always,
    )];

    let run = tokio::spawn(supervisor(config, &broker, shutdown.clone()).run());
    common::wait_until("consumer", || broker.consumers().len() == 1).await;
    assert_eq!(broker.open_connections(), 1);

    shutdown.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_inbound_workflow_leaves_others_running() {
    let broker = FakeBroker::new();
    broker.fail_uri("amqp://down/");
    let mut config = config();
    config.retry = RetryConfig { max_attempts: 2 };

    let mut failing = common::inbound_workflow("amqp://down/", Path::new("/nonexistent"), AckPolicy::Always);
    failing.name = "down".to_string();
    let mut healthy = common::inbound_workflow("amqp://up/", Path::new("/nonexistent"), AckPolicy::Always);
    healthy.name = "up".to_string();
    config.inbound = vec![failing, healthy];

    let running = supervisor(config, &broker, CancellationToken::new())
        .start()
        .await
        .unwrap_or_else(|e| panic!("start: {e}"));

    let mut down = running.inbound()[0].subscribe_state();
    let mut up = running.inbound()[1].subscribe_state();
    common::wait_for_state(&mut down, InboundState::Failed).await;
    common::wait_for_state(&mut up, InboundState::Consuming).await;

    assert_eq!(running.inbound()[0].name(), "down");
    assert_eq!(running.inbound()[1].state(), InboundState::Consuming);

    running.shutdown().await;
    assert_eq!(*up.borrow(), InboundState::Closed);
    assert_eq!(*down.borrow(), InboundState::Failed);
}
