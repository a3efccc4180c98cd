use super::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire version stamped on every task record.
pub const TASK_VERSION: u32 = 1;

/// A uniquely identified unit of work tracked through its status field.
///
/// # Ownership
/// A task is created by its submitter and afterwards mutated only by the
/// [`Process`](crate::process::Process) that currently owns it. Everything else
/// (bridges, listeners, clients) works on cloned snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub version: u32,
    pub id: Uuid,
    pub name: String,
    pub status: Status,
    pub percent_complete: f64,
    pub message: String,
    pub submission_time: DateTime<Utc>,
    pub beamline: Option<String>,
    pub host_name: Option<String>,
    pub user_name: Option<String>,
    pub payload: Payload,
}

impl Task {
    /// Creates a new task with a fresh id in the `Submitted` state.
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            version: TASK_VERSION,
            id: Uuid::new_v4(),
            name: name.into(),
            status: Status::Submitted,
            percent_complete: 0.0,
            message: String::new(),
            submission_time: Utc::now(),
            beamline: None,
            host_name: None,
            user_name: None,
            payload,
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_host(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    pub fn with_beamline(mut self, beamline: impl Into<String>) -> Self {
        self.beamline = Some(beamline.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Kind-specific part of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// A scan executed directly by the worker that dequeues it.
    Scan(ScanRequest),
    /// A queue atom whose work is delegated to a scanning service as a child scan.
    ScanAtom(ScanAtom),
}

/// Describes a one-axis scan over an explicit array of positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub axis: String,
    pub positions: Vec<f64>,
    #[serde(default)]
    pub detectors: Vec<DetectorModel>,
    /// Used when no detector exposure is available.
    #[serde(default)]
    pub time_per_point_ms: u64,
}

impl ScanRequest {
    pub fn new(axis: impl Into<String>, positions: Vec<f64>) -> Self {
        Self {
            axis: axis.into(),
            positions,
            detectors: Vec::new(),
            time_per_point_ms: 0,
        }
    }

    pub fn with_detector(mut self, name: impl Into<String>, exposure_time: f64) -> Self {
        self.detectors.push(DetectorModel {
            name: name.into(),
            exposure_time,
        });
        self
    }

    pub fn with_time_per_point(mut self, millis: u64) -> Self {
        self.time_per_point_ms = millis;
        self
    }
}

/// A detector taking part in a scan. `exposure_time` is in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorModel {
    pub name: String,
    pub exposure_time: f64,
}

/// Parent-side description of a scan to run elsewhere.
///
/// Each channel field overrides the configured default when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanAtom {
    pub scan: ScanRequest,
    #[serde(default)]
    pub broker_address: Option<String>,
    #[serde(default)]
    pub submit_queue: Option<String>,
    #[serde(default)]
    pub status_topic: Option<String>,
    #[serde(default)]
    pub command_channel: Option<String>,
}

impl ScanAtom {
    pub fn new(scan: ScanRequest) -> Self {
        Self {
            scan,
            broker_address: None,
            submit_queue: None,
            status_topic: None,
            command_channel: None,
        }
    }

    pub fn on_service(
        mut self,
        broker_address: impl Into<String>,
        submit_queue: impl Into<String>,
        status_topic: impl Into<String>,
    ) -> Self {
        self.broker_address = Some(broker_address.into());
        self.submit_queue = Some(submit_queue.into());
        self.status_topic = Some(status_topic.into());
        self
    }

    pub fn with_command_channel(mut self, command_channel: impl Into<String>) -> Self {
        self.command_channel = Some(command_channel.into());
        self
    }
}

/// A delegated child task and the channels it lives on.
///
/// Held by a delegating process only while it is waiting on the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildTaskRef {
    pub task_id: Uuid,
    pub broker_address: String,
    pub submit_queue: String,
    pub status_topic: String,
    pub command_channel: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_submitted_with_unique_id() {
        let scan = ScanRequest::new("x", vec![0.0, 1.0]);
        let a = Task::new("a", Payload::Scan(scan.clone()));
        let b = Task::new("b", Payload::Scan(scan));
        assert_eq!(a.status, Status::Submitted);
        assert_eq!(a.version, TASK_VERSION);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn atom_payload_is_tagged_on_the_wire() {
        let atom = ScanAtom::new(ScanRequest::new("x", vec![1.0]));
        let task = Task::new("atom", Payload::ScanAtom(atom)).with_user("op");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["payload"]["kind"], "scan_atom");
        assert_eq!(json["status"], "SUBMITTED");

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }
}
