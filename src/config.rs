//! # Runtime configuration
//!
//! Typed settings with defaults. Loading them (files, environment) is left to
//! the embedding application; every struct derives `Deserialize` for that.
//!
//! ## Defaults
//! - channels: `SUBMIT_QUEUE`, `STATUS_TOPIC`, `COMMAND_TOPIC`, `HEARTBEAT_TOPIC` on `memory://localhost`
//! - heartbeat: a beacon every 5s, a worker is unresponsive after 3 missed beacons
//! - process: blocking, no deadline

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BROKER_ADDRESS: &str = "memory://localhost";
pub const SUBMIT_QUEUE: &str = "SUBMIT_QUEUE";
pub const STATUS_TOPIC: &str = "STATUS_TOPIC";
pub const COMMAND_TOPIC: &str = "COMMAND_TOPIC";
pub const HEARTBEAT_TOPIC: &str = "HEARTBEAT_TOPIC";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channels: ChannelDefaults,
    pub heartbeat: HeartbeatConfig,
    pub process: ProcessConfig,
}

/// Where a service's channels live.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelDefaults {
    pub broker_address: String,
    pub submit_queue: String,
    pub status_topic: String,
    pub command_channel: String,
    pub heartbeat_topic: String,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            broker_address: DEFAULT_BROKER_ADDRESS.to_string(),
            submit_queue: SUBMIT_QUEUE.to_string(),
            status_topic: STATUS_TOPIC.to_string(),
            command_channel: COMMAND_TOPIC.to_string(),
            heartbeat_topic: HEARTBEAT_TOPIC.to_string(),
        }
    }
}

impl ChannelDefaults {
    /// Same channel names, on another service address.
    pub fn at(address: impl Into<String>) -> Self {
        Self {
            broker_address: address.into(),
            ..Self::default()
        }
    }

    /// Prefixes every channel name, for several services sharing one address.
    pub fn prefixed(address: impl Into<String>, prefix: &str) -> Self {
        Self {
            broker_address: address.into(),
            submit_queue: format!("{prefix}.{SUBMIT_QUEUE}"),
            status_topic: format!("{prefix}.{STATUS_TOPIC}"),
            command_channel: format!("{prefix}.{COMMAND_TOPIC}"),
            heartbeat_topic: HEARTBEAT_TOPIC.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between two beacons of one worker.
    pub interval: Duration,
    /// Consecutive missed beacons after which a worker is unresponsive.
    pub miss_threshold: u32,
    /// How often the liveness monitor checks. `None` uses `interval`.
    pub check_interval: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            miss_threshold: 3,
            check_interval: None,
        }
    }
}

impl HeartbeatConfig {
    pub fn check_interval(&self) -> Duration {
        self.check_interval.unwrap_or(self.interval)
    }

    /// Silence longer than this marks a worker unresponsive.
    pub fn silence_limit(&self) -> Duration {
        self.interval * self.miss_threshold.max(1)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Whether `run()` waits for the task to become terminal.
    pub blocking: bool,
    /// Upper bound on a process's blocking wait. `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            blocking: true,
            deadline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"heartbeat": {"miss_threshold": 5}}"#).unwrap();
        assert_eq!(config.heartbeat.miss_threshold, 5);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(config.channels.submit_queue, SUBMIT_QUEUE);
        assert!(config.process.blocking);
        assert_eq!(config.process.deadline, None);
    }

    #[test]
    fn silence_limit_is_interval_times_threshold() {
        let hb = HeartbeatConfig::default();
        assert_eq!(hb.silence_limit(), Duration::from_secs(15));
        assert_eq!(hb.check_interval(), Duration::from_secs(5));
    }
}
