//! Beacons from a publisher, verdicts from the liveness monitor.

use async_trait::async_trait;
use scan_relay::config::HeartbeatConfig;
use scan_relay::fabric::{ChannelFabric, HeartbeatListener, InMemoryBroker};
use scan_relay::heartbeat::{HeartbeatPublisher, LivenessMonitor, Load};
use scan_relay::model::HeartbeatBeacon;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Watch {
    beacons: Mutex<Vec<HeartbeatBeacon>>,
    unresponsive: Mutex<Vec<String>>,
}

#[async_trait]
impl HeartbeatListener for Watch {
    async fn on_beacon(&self, beacon: &HeartbeatBeacon) {
        self.beacons.lock().unwrap().push(beacon.clone());
    }

    async fn on_unresponsive(&self, worker_id: &str) {
        self.unresponsive.lock().unwrap().push(worker_id.to_string());
    }
}

/// Implements nothing; every callback falls back to the provided no-op.
struct Indifferent;

impl HeartbeatListener for Indifferent {}

fn config() -> HeartbeatConfig {
    HeartbeatConfig {
        interval: Duration::from_secs(1),
        miss_threshold: 3,
        check_interval: None,
    }
}

#[tokio::test(start_paused = true)]
async fn a_silent_worker_is_reported_exactly_once() {
    let fabric = ChannelFabric::new(Arc::new(InMemoryBroker::new()));
    let topic = fabric.open_heartbeat_topic("mem", "HEARTBEAT_TOPIC").unwrap();
    let watch = Arc::new(Watch::default());
    let monitor = LivenessMonitor::start(&topic, &config(), watch.clone()).unwrap();

    let publisher = HeartbeatPublisher::start(
        fabric.open_heartbeat_topic("mem", "HEARTBEAT_TOPIC").unwrap(),
        "worker-7",
        config().interval,
        || Load {
            queue_depth: Some(2),
            active_tasks: Some(1),
        },
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(watch.unresponsive.lock().unwrap().is_empty());
    assert_eq!(monitor.is_responsive("worker-7"), Some(true));
    {
        let beacons = watch.beacons.lock().unwrap();
        assert!(beacons.len() >= 10, "{}", beacons.len());
        assert_eq!(beacons[0].worker_id, "worker-7");
        assert_eq!(beacons[0].queue_depth, Some(2));
        assert_eq!(beacons[0].active_tasks, Some(1));
    }

    publisher.stop().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(*watch.unresponsive.lock().unwrap(), vec!["worker-7".to_string()]);
    assert_eq!(monitor.is_responsive("worker-7"), Some(false));
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn listeners_need_not_implement_anything() {
    let fabric = ChannelFabric::new(Arc::new(InMemoryBroker::new()));
    let topic = fabric.open_heartbeat_topic("mem", "HEARTBEAT_TOPIC").unwrap();
    let monitor = LivenessMonitor::start(&topic, &config(), Arc::new(Indifferent)).unwrap();

    topic.publish(&HeartbeatBeacon::new("worker-1")).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(monitor.known_workers(), vec!["worker-1".to_string()]);
    assert_eq!(monitor.is_responsive("worker-1"), Some(false));
    monitor.stop().await;
}
