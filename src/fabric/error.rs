//! Error types for the channel fabric.

use thiserror::Error;

/// Errors raised by channel handles and the underlying broker.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The broker at `address` could not be reached. Fatal to the current step.
    #[error("Cannot connect to {address}: {reason}")]
    Connection { address: String, reason: String },

    /// A send failed after the connection was established.
    #[error("Send to {endpoint} failed: {reason}")]
    Send { endpoint: String, reason: String },

    /// The handle was already released.
    #[error("Channel {endpoint} is disconnected")]
    Disconnected { endpoint: String },

    /// A record could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ChannelError {
    /// Only sends on a live connection may be retried, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Send { .. })
    }
}
