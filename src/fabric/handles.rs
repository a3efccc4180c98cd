//! # Scoped Channel Handles
//!
//! A handle is registered with the broker when it is opened and released either
//! explicitly (`disconnect` / `unsubscribe`) or when it is dropped. Dropping is
//! the backstop that makes every exit path (return, `?`, cancellation, panic
//! unwinding) release what was opened.

use super::{Broker, ChannelError, CommandListener, Endpoint, HandleKind, HeartbeatListener, StatusListener};
use crate::model::{Command, HeartbeatBeacon, Task};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Entry point for opening channel handles on a broker.
#[derive(Clone)]
pub struct ChannelFabric {
    broker: Arc<dyn Broker>,
}

impl ChannelFabric {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Fails with [`ChannelError::Connection`] if `address` cannot be reached.
    pub fn connect(&self, address: &str) -> Result<(), ChannelError> {
        self.broker.ping(address)
    }

    pub fn open_submit_queue(&self, address: &str, name: &str) -> Result<SubmitQueue, ChannelError> {
        Ok(SubmitQueue {
            handle: Handle::open(&self.broker, Endpoint::new(address, name), HandleKind::Submitter)?,
        })
    }

    /// Opens the receiving side of a submit queue, used by consumers.
    pub fn open_work_queue(&self, address: &str, name: &str) -> Result<WorkQueue, ChannelError> {
        Ok(WorkQueue {
            handle: Handle::open(&self.broker, Endpoint::new(address, name), HandleKind::Receiver)?,
        })
    }

    pub fn open_status_topic(&self, address: &str, name: &str) -> Result<StatusTopic, ChannelError> {
        Topic::open(&self.broker, Endpoint::new(address, name))
    }

    pub fn open_command_channel(&self, address: &str, name: &str) -> Result<CommandChannel, ChannelError> {
        Topic::open(&self.broker, Endpoint::new(address, name))
    }

    pub fn open_heartbeat_topic(&self, address: &str, name: &str) -> Result<HeartbeatTopic, ChannelError> {
        Topic::open(&self.broker, Endpoint::new(address, name))
    }
}

/// Broker registration shared by every handle type.
struct Handle {
    broker: Arc<dyn Broker>,
    endpoint: Endpoint,
    kind: HandleKind,
    connected: bool,
}

impl Handle {
    fn open(broker: &Arc<dyn Broker>, endpoint: Endpoint, kind: HandleKind) -> Result<Self, ChannelError> {
        broker.open(&endpoint, kind)?;
        Ok(Self {
            broker: broker.clone(),
            endpoint,
            kind,
            connected: true,
        })
    }

    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.connected {
            Ok(())
        } else {
            Err(ChannelError::Disconnected {
                endpoint: self.endpoint.to_string(),
            })
        }
    }

    fn release(&mut self) -> Result<(), ChannelError> {
        if !self.connected {
            return Ok(());
        }
        // Marked released even if the broker complains; the handle is unusable either way.
        self.connected = false;
        self.broker.close(&self.endpoint, self.kind)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!(endpoint = %self.endpoint, error = %e, "Release on drop failed");
        }
    }
}

/// Sending side of a work queue.
pub struct SubmitQueue {
    handle: Handle,
}

impl SubmitQueue {
    pub fn submit(&self, task: &Task) -> Result<(), ChannelError> {
        self.handle.ensure_connected()?;
        let payload = serde_json::to_string(task)?;
        self.handle.broker.enqueue(&self.handle.endpoint, payload)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.handle.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.handle.connected
    }

    pub fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.handle.release()
    }
}

/// Receiving side of a work queue.
pub struct WorkQueue {
    handle: Handle,
}

impl WorkQueue {
    /// Waits for the next task. Cancel-safe.
    pub async fn receive(&self) -> Result<Task, ChannelError> {
        self.handle.ensure_connected()?;
        let payload = self.handle.broker.dequeue(&self.handle.endpoint).await?;
        Ok(serde_json::from_str(&payload)?)
    }

    pub fn depth(&self) -> usize {
        self.handle.broker.queue_depth(&self.handle.endpoint)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.handle.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.handle.connected
    }

    pub fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.handle.release()
    }
}

/// Publishing side of a broadcast topic carrying records of type `M`.
pub struct Topic<M> {
    handle: Handle,
    _record: PhantomData<fn(M)>,
}

pub type StatusTopic = Topic<Task>;
pub type CommandChannel = Topic<Command>;
pub type HeartbeatTopic = Topic<HeartbeatBeacon>;

impl<M> Topic<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    fn open(broker: &Arc<dyn Broker>, endpoint: Endpoint) -> Result<Self, ChannelError> {
        Ok(Self {
            handle: Handle::open(broker, endpoint, HandleKind::Publisher)?,
            _record: PhantomData,
        })
    }

    pub fn publish(&self, record: &M) -> Result<(), ChannelError> {
        self.handle.ensure_connected()?;
        let payload = serde_json::to_string(record)?;
        self.handle.broker.publish(&self.handle.endpoint, payload)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.handle.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.handle.connected
    }

    pub fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.handle.release()
    }

    /// Opens another publisher on the same endpoint.
    pub fn try_clone(&self) -> Result<Self, ChannelError> {
        self.handle.ensure_connected()?;
        Self::open(&self.handle.broker, self.handle.endpoint.clone())
    }

    /// Starts a listener task that decodes each record and hands it to `deliver`.
    ///
    /// Records are delivered sequentially in publish order. Undecodable records
    /// are skipped with a warning.
    pub fn listen<F, Fut>(&self, deliver: F) -> Result<Subscription, ChannelError>
    where
        F: Fn(M) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle.ensure_connected()?;
        let broker = &self.handle.broker;
        let endpoint = self.handle.endpoint.clone();
        let mut receiver = broker.listen(&endpoint)?;
        let handle = Handle::open(broker, endpoint.clone(), HandleKind::Subscriber)?;

        let pump = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => match serde_json::from_str::<M>(&payload) {
                        Ok(record) => deliver(record).await,
                        Err(e) => warn!(%endpoint, error = %e, "Dropping undecodable record"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%endpoint, skipped, "Subscriber lagged")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription {
            handle,
            pump: Some(pump),
        })
    }
}

impl Topic<Task> {
    pub fn subscribe(&self, listener: Arc<dyn StatusListener>) -> Result<Subscription, ChannelError> {
        self.listen(move |task| {
            let listener = listener.clone();
            async move { listener.on_event(&task).await }
        })
    }
}

impl Topic<Command> {
    pub fn send(&self, command: &Command) -> Result<(), ChannelError> {
        self.publish(command)
    }

    pub fn subscribe(&self, listener: Arc<dyn CommandListener>) -> Result<Subscription, ChannelError> {
        self.listen(move |command| {
            let listener = listener.clone();
            async move { listener.on_command(&command).await }
        })
    }
}

impl Topic<HeartbeatBeacon> {
    pub fn subscribe(&self, listener: Arc<dyn HeartbeatListener>) -> Result<Subscription, ChannelError> {
        self.listen(move |beacon| {
            let listener = listener.clone();
            async move { listener.on_beacon(&beacon).await }
        })
    }
}

/// A live listener on a topic. Dropping it stops delivery.
pub struct Subscription {
    handle: Handle,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn endpoint(&self) -> &Endpoint {
        &self.handle.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.handle.connected
    }

    /// Stops delivery and waits until the listener task has fully exited.
    pub async fn unsubscribe(mut self) -> Result<(), ChannelError> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
        self.handle.release()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
