//! # Scan Relay demo
//!
//! Starts a [`ScanSystem`], then:
//! 1. Runs a scan delegated from the queue service to the scan service.
//! 2. Starts a second delegated scan and terminates it from the caller's side.

use scan_relay::config::Config;
use scan_relay::lifecycle::{setup_tracing, ScanSystem};
use scan_relay::model::{Payload, ScanAtom, ScanRequest, Status, Task};
use std::time::Duration;
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();
    info!("Starting scan relay demo");

    let system = ScanSystem::start(Config::default()).map_err(|e| e.to_string())?;

    let request = ScanRequest::new("stage_x", vec![0.0, 0.5, 1.0, 1.5, 2.0]).with_detector("mandelbrot", 0.05);
    let task = Task::new("demo grid", Payload::ScanAtom(ScanAtom::new(request)))
        .with_user("demo")
        .with_beamline("b01");

    let done = async {
        info!(task_id = %task.id, "Submitting delegated scan");
        system
            .client
            .submit_and_wait(&task, Some(Duration::from_secs(30)))
            .await
            .map_err(|e| e.to_string())
    }
    .instrument(tracing::info_span!("delegated_scan"))
    .await?;
    info!(status = %done.status, message = %done.message, "Delegated scan finished");

    let long = ScanRequest::new("stage_y", vec![0.0; 200]).with_time_per_point(50);
    let doomed = Task::new("demo abort", Payload::ScanAtom(ScanAtom::new(long)));
    let waiter = {
        let client = system.client.clone();
        let doomed = doomed.clone();
        tokio::spawn(async move { client.submit_and_wait(&doomed, Some(Duration::from_secs(30))).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    system.client.terminate(doomed.id).map_err(|e| e.to_string())?;

    match waiter.await.map_err(|e| e.to_string())? {
        Ok(task) if task.status == Status::Terminated => {
            info!(message = %task.message, "Scan terminated as requested")
        }
        Ok(task) => error!(status = %task.status, "Scan was expected to be terminated"),
        Err(e) => error!(error = %e, "Scan did not settle"),
    }

    system.shutdown().await;
    Ok(())
}
