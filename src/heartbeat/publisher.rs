use crate::fabric::HeartbeatTopic;
use crate::model::HeartbeatBeacon;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Load figures attached to each beacon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Load {
    pub queue_depth: Option<usize>,
    pub active_tasks: Option<usize>,
}

/// Publishes a beacon for one worker at a fixed interval until stopped.
///
/// The first beacon goes out immediately. A failed publish is logged and the
/// next tick tries again; liveness is the monitor's call, not the publisher's.
pub struct HeartbeatPublisher {
    worker_id: String,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatPublisher {
    pub fn start<P>(mut topic: HeartbeatTopic, worker_id: impl Into<String>, interval: Duration, probe: P) -> Self
    where
        P: Fn() -> Load + Send + 'static,
    {
        let worker_id = worker_id.into();
        let (stop, mut stopped) = oneshot::channel();
        let id = worker_id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(worker_id = %id, ?interval, endpoint = %topic.endpoint(), "Heartbeat started");
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let load = probe();
                        let mut beacon = HeartbeatBeacon::new(id.clone());
                        beacon.queue_depth = load.queue_depth;
                        beacon.active_tasks = load.active_tasks;
                        match topic.publish(&beacon) {
                            Ok(()) => debug!(worker_id = %id, ?load, "Beacon"),
                            Err(e) => warn!(worker_id = %id, error = %e, "Beacon not published"),
                        }
                    }
                }
            }
            if let Err(e) = topic.disconnect() {
                warn!(worker_id = %id, error = %e, "Failed to release heartbeat topic");
            }
            info!(worker_id = %id, "Heartbeat stopped");
        });

        Self {
            worker_id,
            stop: Some(stop),
            task: Some(task),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Stops publishing and waits for the heartbeat topic to be released.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HeartbeatPublisher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
