use crate::config::HeartbeatConfig;
use crate::fabric::{ChannelError, HeartbeatListener, HeartbeatTopic, Subscription};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

struct Liveness {
    last_seen: Instant,
    unresponsive: bool,
}

type Workers = Arc<Mutex<HashMap<String, Liveness>>>;

fn lock(workers: &Workers) -> MutexGuard<'_, HashMap<String, Liveness>> {
    workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turns the raw beacon stream into per-worker liveness verdicts.
///
/// A worker silent for longer than `interval * miss_threshold` is reported
/// through [`HeartbeatListener::on_unresponsive`] once. It is reported again
/// only after a beacon has brought it back ([`HeartbeatListener::on_recovered`]).
pub struct LivenessMonitor {
    workers: Workers,
    subscription: Option<Subscription>,
    checker: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn start(
        topic: &HeartbeatTopic,
        config: &HeartbeatConfig,
        listener: Arc<dyn HeartbeatListener>,
    ) -> Result<Self, ChannelError> {
        let workers: Workers = Arc::default();

        let seen = workers.clone();
        let on_beacon = listener.clone();
        let subscription = topic.listen(move |beacon| {
            let recovered = {
                let mut workers = lock(&seen);
                let entry = workers.entry(beacon.worker_id.clone()).or_insert(Liveness {
                    last_seen: Instant::now(),
                    unresponsive: false,
                });
                entry.last_seen = Instant::now();
                std::mem::replace(&mut entry.unresponsive, false)
            };
            let listener = on_beacon.clone();
            async move {
                if recovered {
                    info!(worker_id = %beacon.worker_id, "Worker recovered");
                    listener.on_recovered(&beacon.worker_id).await;
                }
                listener.on_beacon(&beacon).await;
            }
        })?;

        let checker = tokio::spawn(check_loop(
            workers.clone(),
            config.check_interval(),
            config.silence_limit(),
            listener,
        ));

        Ok(Self {
            workers,
            subscription: Some(subscription),
            checker: Some(checker),
        })
    }

    /// Workers that have sent at least one beacon.
    pub fn known_workers(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.workers).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `None` if the worker was never seen.
    pub fn is_responsive(&self, worker_id: &str) -> Option<bool> {
        lock(&self.workers).get(worker_id).map(|w| !w.unresponsive)
    }

    pub async fn stop(mut self) {
        if let Some(checker) = self.checker.take() {
            checker.abort();
        }
        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = subscription.unsubscribe().await {
                warn!(error = %e, "Failed to unsubscribe liveness monitor");
            }
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        if let Some(checker) = self.checker.take() {
            checker.abort();
        }
    }
}

async fn check_loop(workers: Workers, every: Duration, limit: Duration, listener: Arc<dyn HeartbeatListener>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let silent: Vec<(String, Duration)> = lock(&workers)
            .iter_mut()
            .filter_map(|(id, w)| {
                let silence = now.duration_since(w.last_seen);
                if w.unresponsive || silence <= limit {
                    return None;
                }
                w.unresponsive = true;
                Some((id.clone(), silence))
            })
            .collect();
        for (worker_id, silence) in silent {
            warn!(%worker_id, ?silence, "Worker unresponsive");
            listener.on_unresponsive(&worker_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{ChannelFabric, InMemoryBroker};
    use crate::model::HeartbeatBeacon;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Verdicts {
        beacons: Mutex<usize>,
        unresponsive: Mutex<Vec<String>>,
        recovered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HeartbeatListener for Verdicts {
        async fn on_beacon(&self, _beacon: &HeartbeatBeacon) {
            *self.beacons.lock().unwrap() += 1;
        }

        async fn on_unresponsive(&self, worker_id: &str) {
            self.unresponsive.lock().unwrap().push(worker_id.to_string());
        }

        async fn on_recovered(&self, worker_id: &str) {
            self.recovered.lock().unwrap().push(worker_id.to_string());
        }
    }

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(1),
            miss_threshold: 3,
            check_interval: Some(Duration::from_millis(500)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_reported_once_and_recovery_rearms() {
        let fabric = ChannelFabric::new(Arc::new(InMemoryBroker::new()));
        let topic = fabric.open_heartbeat_topic("mem", "HB").unwrap();
        let verdicts = Arc::new(Verdicts::default());
        let monitor = LivenessMonitor::start(&topic, &config(), verdicts.clone()).unwrap();

        topic.publish(&HeartbeatBeacon::new("w1")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.is_responsive("w1"), Some(true));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(*verdicts.unresponsive.lock().unwrap(), vec!["w1".to_string()]);
        assert_eq!(monitor.is_responsive("w1"), Some(false));

        topic.publish(&HeartbeatBeacon::new("w1")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*verdicts.recovered.lock().unwrap(), vec!["w1".to_string()]);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(verdicts.unresponsive.lock().unwrap().len(), 2);
        assert_eq!(*verdicts.beacons.lock().unwrap(), 2);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_workers_have_no_verdict() {
        let fabric = ChannelFabric::new(Arc::new(InMemoryBroker::new()));
        let topic = fabric.open_heartbeat_topic("mem", "HB").unwrap();
        let monitor = LivenessMonitor::start(&topic, &config(), Arc::new(Verdicts::default())).unwrap();
        assert_eq!(monitor.is_responsive("ghost"), None);
        assert!(monitor.known_workers().is_empty());
    }
}
