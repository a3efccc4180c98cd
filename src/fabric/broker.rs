//! # Broker Transport
//!
//! The [`Broker`] trait is the only thing the rest of the crate knows about the
//! message transport. Records travel as JSON strings; typed encoding happens in
//! the channel handles.
//!
//! ## Channel Kinds
//!
//! - **Queues** (`enqueue` / `dequeue`): each record is consumed by exactly one receiver.
//! - **Topics** (`publish` / `listen`): each record is seen by every live listener,
//!   in publish order per publisher.
//!
//! Implementations provide at-least-once delivery; duplicates are tolerated above.

use super::ChannelError;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;

/// A (service address, channel name) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub name: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.name)
    }
}

/// The role a handle plays on its endpoint. Brokers count open handles per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Submitter,
    Receiver,
    Publisher,
    Subscriber,
}

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Checks that the service at `address` is reachable.
    fn ping(&self, address: &str) -> Result<(), ChannelError>;

    /// Registers a handle on `endpoint`. Fails if the address is unreachable.
    fn open(&self, endpoint: &Endpoint, kind: HandleKind) -> Result<(), ChannelError>;

    /// Releases a handle previously registered with [`Broker::open`].
    fn close(&self, endpoint: &Endpoint, kind: HandleKind) -> Result<(), ChannelError>;

    fn enqueue(&self, endpoint: &Endpoint, payload: String) -> Result<(), ChannelError>;

    /// Waits for the next record on a queue. Must be cancel-safe.
    async fn dequeue(&self, endpoint: &Endpoint) -> Result<String, ChannelError>;

    fn publish(&self, endpoint: &Endpoint, payload: String) -> Result<(), ChannelError>;

    /// Returns a receiver for records published after this call.
    fn listen(&self, endpoint: &Endpoint) -> Result<broadcast::Receiver<String>, ChannelError>;

    /// Number of records waiting on a queue.
    fn queue_depth(&self, _endpoint: &Endpoint) -> usize {
        0
    }
}
