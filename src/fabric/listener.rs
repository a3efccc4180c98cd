//! Listener capabilities.
//!
//! Every callback has a provided no-op body, so an adopter implements only the
//! callbacks it needs. Listeners only read and translate; they never mutate a
//! task owned by another component.

use crate::model::{Command, HeartbeatBeacon, Task};
use async_trait::async_trait;

/// Receives task snapshots published on a status topic.
#[async_trait]
pub trait StatusListener: Send + Sync + 'static {
    async fn on_event(&self, _task: &Task) {}
}

/// Receives control messages from a command channel.
#[async_trait]
pub trait CommandListener: Send + Sync + 'static {
    async fn on_command(&self, _command: &Command) {}
}

/// Receives liveness beacons, and the verdicts of a
/// [`LivenessMonitor`](crate::heartbeat::LivenessMonitor) when attached to one.
#[async_trait]
pub trait HeartbeatListener: Send + Sync + 'static {
    async fn on_beacon(&self, _beacon: &HeartbeatBeacon) {}

    /// Called once when a worker crosses the missed-beat threshold.
    async fn on_unresponsive(&self, _worker_id: &str) {}

    /// Called when a worker previously reported unresponsive beats again.
    async fn on_recovered(&self, _worker_id: &str) {}
}
