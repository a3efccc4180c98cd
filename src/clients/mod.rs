//! Caller-side access to a service: submit tasks, wait for them, control them.

pub mod submission_client;

pub use submission_client::*;
