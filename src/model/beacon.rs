use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Periodic liveness message published by an active consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatBeacon {
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub queue_depth: Option<usize>,
    #[serde(default)]
    pub active_tasks: Option<usize>,
}

impl HeartbeatBeacon {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
            queue_depth: None,
            active_tasks: None,
        }
    }
}
