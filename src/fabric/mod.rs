//! Channel fabric: addressable queues and topics over a pluggable broker.
//!
//! # Main Components
//!
//! - [`Broker`] - Transport contract; [`InMemoryBroker`] is the bundled implementation
//! - [`ChannelFabric`] - Opens handles bound to a (service address, channel name) pair
//! - [`SubmitQueue`] / [`WorkQueue`] - Work items, each consumed once
//! - [`StatusTopic`] / [`CommandChannel`] / [`HeartbeatTopic`] - Broadcast topics
//! - [`Subscription`] - A live listener; released on `unsubscribe` or drop
//!
//! # Testing
//!
//! See [`mock`] for a scripted stand-in of a remote service.

pub mod broker;
pub mod error;
pub mod handles;
pub mod listener;
pub mod memory;
pub mod mock;

pub use broker::{Broker, Endpoint, HandleKind};
pub use error::ChannelError;
pub use handles::*;
pub use listener::*;
pub use memory::InMemoryBroker;
