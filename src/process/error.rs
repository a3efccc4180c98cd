//! Error types for processes.

use crate::fabric::ChannelError;
use std::time::Duration;
use thiserror::Error;

/// Errors that end or refuse a step of a process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The transport failed. Fatal to the current step, never retried automatically.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The child task could not be built from the parent.
    #[error("Could not derive child task: {0}")]
    Derivation(#[from] DerivationError),

    /// A blocking wait outlived its deadline.
    #[error("Timed out after {after:?}")]
    Timeout { after: Duration },

    /// The operation is not available on this process variant. State is unchanged.
    #[error("{operation} is not supported by {variant} processes")]
    UnsupportedOperation {
        operation: &'static str,
        variant: &'static str,
    },

    /// The work stopped because termination was requested.
    #[error("Interrupted by a termination request")]
    Interrupted,

    /// The work itself reported a failure.
    #[error("{0}")]
    Work(String),
}

/// Why a child task could not be derived from its parent.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DerivationError {
    #[error("Task {0} does not carry delegated work")]
    NotDelegating(String),

    #[error("Parent task has no name")]
    EmptyName,

    #[error("Invalid scan request: {0}")]
    InvalidScanRequest(String),

    #[error("Invalid channel address: {0}")]
    InvalidAddress(String),
}

/// What became of a pause/resume/terminate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command was acted upon.
    Applied,
    /// The task was already terminal; the command was discarded and logged.
    Stale,
    /// The command does not apply in the current state (e.g. resuming a running task).
    Ignored,
}
