//! In-process [`Broker`] used by tests, the demo system, and single-host deployments.
//!
//! Besides plain delivery it supports fault injection (unreachable addresses,
//! failing endpoints) and inspection of open handles, so tests can prove that
//! every component released what it opened.

use super::{Broker, ChannelError, Endpoint, HandleKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, trace};

const TOPIC_CAPACITY: usize = 256;

#[derive(Default)]
struct Queue {
    records: Mutex<VecDeque<String>>,
    ready: Notify,
}

#[derive(Default)]
struct State {
    queues: HashMap<Endpoint, Arc<Queue>>,
    topics: HashMap<Endpoint, broadcast::Sender<String>>,
    handles: HashMap<(Endpoint, HandleKind), usize>,
    unreachable: HashSet<String>,
    failing: HashSet<Endpoint>,
}

/// Shared in-memory broker. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks every endpoint at `address` reachable or not.
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut state = self.lock();
        if reachable {
            state.unreachable.remove(address);
        } else {
            state.unreachable.insert(address.to_string());
        }
    }

    /// Makes sends to `endpoint` fail with [`ChannelError::Send`] until cleared.
    pub fn fail_sends_on(&self, endpoint: &Endpoint, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(endpoint.clone());
        } else {
            state.failing.remove(endpoint);
        }
    }

    /// Number of handles of any kind currently open on `endpoint`.
    pub fn open_handles(&self, endpoint: &Endpoint) -> usize {
        self.lock()
            .handles
            .iter()
            .filter(|((e, _), _)| e == endpoint)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Number of handles of `kind` currently open on `endpoint`.
    pub fn open_handles_of(&self, endpoint: &Endpoint, kind: HandleKind) -> usize {
        self.lock()
            .handles
            .get(&(endpoint.clone(), kind))
            .copied()
            .unwrap_or(0)
    }

    fn check_reachable(state: &State, address: &str) -> Result<(), ChannelError> {
        if state.unreachable.contains(address) {
            return Err(ChannelError::Connection {
                address: address.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn check_send(state: &State, endpoint: &Endpoint) -> Result<(), ChannelError> {
        Self::check_reachable(state, &endpoint.address)?;
        if state.failing.contains(endpoint) {
            return Err(ChannelError::Send {
                endpoint: endpoint.to_string(),
                reason: "endpoint rejected the record".to_string(),
            });
        }
        Ok(())
    }

    fn queue(&self, endpoint: &Endpoint) -> Arc<Queue> {
        self.lock().queues.entry(endpoint.clone()).or_default().clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn ping(&self, address: &str) -> Result<(), ChannelError> {
        Self::check_reachable(&self.lock(), address)
    }

    fn open(&self, endpoint: &Endpoint, kind: HandleKind) -> Result<(), ChannelError> {
        let mut state = self.lock();
        Self::check_reachable(&state, &endpoint.address)?;
        *state.handles.entry((endpoint.clone(), kind)).or_insert(0) += 1;
        debug!(%endpoint, ?kind, "Handle opened");
        Ok(())
    }

    fn close(&self, endpoint: &Endpoint, kind: HandleKind) -> Result<(), ChannelError> {
        let mut state = self.lock();
        let key = (endpoint.clone(), kind);
        match state.handles.get_mut(&key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                state.handles.remove(&key);
            }
            None => {
                return Err(ChannelError::Disconnected {
                    endpoint: endpoint.to_string(),
                })
            }
        }
        debug!(%endpoint, ?kind, "Handle closed");
        Ok(())
    }

    fn enqueue(&self, endpoint: &Endpoint, payload: String) -> Result<(), ChannelError> {
        Self::check_send(&self.lock(), endpoint)?;
        let queue = self.queue(endpoint);
        queue
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(payload);
        queue.ready.notify_one();
        trace!(%endpoint, "Enqueued");
        Ok(())
    }

    async fn dequeue(&self, endpoint: &Endpoint) -> Result<String, ChannelError> {
        let queue = self.queue(endpoint);
        loop {
            Self::check_reachable(&self.lock(), &endpoint.address)?;
            let next = queue
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop_front();
            if let Some(payload) = next {
                return Ok(payload);
            }
            queue.ready.notified().await;
        }
    }

    fn publish(&self, endpoint: &Endpoint, payload: String) -> Result<(), ChannelError> {
        let mut state = self.lock();
        Self::check_send(&state, endpoint)?;
        let sender = state
            .topics
            .entry(endpoint.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        // No live listener is not an error on a topic.
        let _ = sender.send(payload);
        trace!(%endpoint, "Published");
        Ok(())
    }

    fn listen(&self, endpoint: &Endpoint) -> Result<broadcast::Receiver<String>, ChannelError> {
        let mut state = self.lock();
        Self::check_reachable(&state, &endpoint.address)?;
        Ok(state
            .topics
            .entry(endpoint.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe())
    }

    fn queue_depth(&self, endpoint: &Endpoint) -> usize {
        let queue = self.lock().queues.get(endpoint).cloned();
        queue.map_or(0, |q| {
            q.records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_records_are_consumed_once_in_order() {
        let broker = InMemoryBroker::new();
        let q = Endpoint::new("mem", "Q");
        broker.enqueue(&q, "a".into()).unwrap();
        broker.enqueue(&q, "b".into()).unwrap();
        assert_eq!(broker.queue_depth(&q), 2);
        assert_eq!(broker.dequeue(&q).await.unwrap(), "a");
        assert_eq!(broker.dequeue(&q).await.unwrap(), "b");
        assert_eq!(broker.queue_depth(&q), 0);
    }

    #[tokio::test]
    async fn dequeue_wakes_when_a_record_arrives() {
        let broker = InMemoryBroker::new();
        let q = Endpoint::new("mem", "Q");
        let waiter = {
            let broker = broker.clone();
            let q = q.clone();
            tokio::spawn(async move { broker.dequeue(&q).await })
        };
        tokio::task::yield_now().await;
        broker.enqueue(&q, "late".into()).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), "late");
    }

    #[tokio::test]
    async fn topic_fans_out_to_every_listener() {
        let broker = InMemoryBroker::new();
        let t = Endpoint::new("mem", "T");
        let mut first = broker.listen(&t).unwrap();
        let mut second = broker.listen(&t).unwrap();
        broker.publish(&t, "x".into()).unwrap();
        assert_eq!(first.recv().await.unwrap(), "x");
        assert_eq!(second.recv().await.unwrap(), "x");
    }

    #[test]
    fn unreachable_address_fails_with_connection_error() {
        let broker = InMemoryBroker::new();
        broker.set_reachable("down", false);
        let e = Endpoint::new("down", "Q");
        let err = broker.open(&e, HandleKind::Submitter).unwrap_err();
        assert!(matches!(err, ChannelError::Connection { .. }));
        assert!(!err.is_retryable());
        assert!(broker.ping("down").is_err());
    }

    #[test]
    fn failing_endpoint_reports_retryable_send_error() {
        let broker = InMemoryBroker::new();
        let e = Endpoint::new("mem", "Q");
        broker.fail_sends_on(&e, true);
        let err = broker.enqueue(&e, "r".into()).unwrap_err();
        assert!(err.is_retryable());
        broker.fail_sends_on(&e, false);
        assert!(broker.enqueue(&e, "r".into()).is_ok());
    }

    #[test]
    fn handle_counts_track_open_and_close() {
        let broker = InMemoryBroker::new();
        let e = Endpoint::new("mem", "T");
        broker.open(&e, HandleKind::Publisher).unwrap();
        broker.open(&e, HandleKind::Subscriber).unwrap();
        assert_eq!(broker.open_handles(&e), 2);
        broker.close(&e, HandleKind::Publisher).unwrap();
        assert_eq!(broker.open_handles(&e), 1);
        broker.close(&e, HandleKind::Subscriber).unwrap();
        assert_eq!(broker.open_handles(&e), 0);
        assert!(broker.close(&e, HandleKind::Subscriber).is_err());
    }
}
