//! End-to-end: a queue service delegating to a scan service over one broker.

use scan_relay::config::{Config, ProcessConfig};
use scan_relay::fabric::Endpoint;
use scan_relay::lifecycle::{setup_tracing, ScanSystem, QUEUE_WORKER, SCAN_WORKER};
use scan_relay::model::{Payload, ScanAtom, ScanRequest, Status, Task};
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn atom(positions: usize, millis: u64) -> Task {
    let request = ScanRequest::new("stage_x", vec![0.5; positions]).with_time_per_point(millis);
    Task::new("grid", Payload::ScanAtom(ScanAtom::new(request))).with_user("operator")
}

#[tokio::test]
async fn delegated_scan_runs_on_the_scan_service() {
    setup_tracing();
    let system = ScanSystem::start(Config::default()).unwrap();

    let done = system.client.submit_and_wait(&atom(4, 1), WAIT).await.unwrap();

    assert_eq!(done.status, Status::Complete);
    assert_eq!(done.percent_complete, 100.0);
    assert_eq!(done.message, "Scan completed successfully");

    let scan = system.scan_client.channels().clone();
    let child_status = Endpoint::new(&scan.broker_address, &scan.status_topic);
    assert_eq!(
        system.broker.open_handles_of(&child_status, scan_relay::fabric::HandleKind::Subscriber),
        0
    );
    system.shutdown().await;
}

#[tokio::test]
async fn direct_scans_run_in_place() {
    setup_tracing();
    let system = ScanSystem::start(Config::default()).unwrap();
    let task = Task::new("line", Payload::Scan(ScanRequest::new("stage_y", vec![0.0, 1.0, 2.0])));

    let done = system.scan_client.submit_and_wait(&task, WAIT).await.unwrap();

    assert_eq!(done.status, Status::Complete);
    assert_eq!(done.message, "Scanned 3 points along stage_y");
    system.shutdown().await;
}

#[tokio::test]
async fn terminating_a_delegated_scan_from_the_caller() {
    setup_tracing();
    let system = ScanSystem::start(Config::default()).unwrap();
    let task = atom(500, 20);

    let waiter = {
        let client = system.client.clone();
        let task = task.clone();
        tokio::spawn(async move { client.submit_and_wait(&task, WAIT).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    system.client.terminate(task.id).unwrap();

    let done = waiter.await.unwrap().unwrap();
    assert_eq!(done.status, Status::Terminated);
    assert_eq!(done.message, "Termination requested before completion");
    system.shutdown().await;
}

#[tokio::test]
async fn pause_and_resume_a_direct_scan() {
    setup_tracing();
    let system = ScanSystem::start(Config::default()).unwrap();
    let task = Task::new("line", Payload::Scan(ScanRequest::new("stage_y", vec![0.0; 40]).with_time_per_point(10)));

    let waiter = {
        let client = system.scan_client.clone();
        let task = task.clone();
        tokio::spawn(async move { client.submit_and_wait(&task, WAIT).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    system.scan_client.pause(task.id).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());
    system.scan_client.resume(task.id).unwrap();

    let done = waiter.await.unwrap().unwrap();
    assert_eq!(done.status, Status::Complete);
    system.shutdown().await;
}

#[tokio::test]
async fn a_deadline_fails_the_parent_when_the_child_is_slow() {
    setup_tracing();
    let config = Config {
        process: ProcessConfig {
            blocking: true,
            deadline: Some(Duration::from_millis(200)),
        },
        ..Config::default()
    };
    let system = ScanSystem::start(config).unwrap();

    let done = system.client.submit_and_wait(&atom(100, 50), WAIT).await.unwrap();

    assert_eq!(done.status, Status::Failed);
    assert!(done.message.starts_with("Timed out"), "{}", done.message);
    system.shutdown().await;
}

#[tokio::test]
async fn both_services_send_heartbeats() {
    setup_tracing();
    let system = ScanSystem::start(Config::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(system.is_responsive(QUEUE_WORKER), Some(true));
    assert_eq!(system.is_responsive(SCAN_WORKER), Some(true));
    system.shutdown().await;
}
