//! # Heartbeat
//!
//! Active workers publish a [`HeartbeatBeacon`](crate::model::HeartbeatBeacon)
//! on a shared topic at a fixed interval. Anyone may listen with a
//! [`HeartbeatListener`](crate::fabric::HeartbeatListener); the
//! [`LivenessMonitor`] layers the missed-beat policy on top of the raw stream.
//!
//! ```text
//! Consumer ──► HeartbeatPublisher ──► HEARTBEAT_TOPIC ──► LivenessMonitor ──► on_unresponsive / on_recovered
//!                                                    └──► any HeartbeatListener::on_beacon
//! ```
//!
//! Interval and threshold come from [`HeartbeatConfig`](crate::config::HeartbeatConfig).

pub mod monitor;
pub mod publisher;

pub use monitor::LivenessMonitor;
pub use publisher::{HeartbeatPublisher, Load};
