//! Error types specific to the byte transport.

use thiserror::Error;

/// Transport error type.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peripheral NACKed the transfer. The chip does this while it
    /// is busy executing a command, so this is retryable.
    #[error("Device not ready (NACK)")]
    Nack,

    /// Failed to open or configure the bus.
    #[error("Failed to connect to device")]
    Connection,

    /// The transfer failed for a reason other than a NACK.
    #[error("Failed to transmit data")]
    Transmission,

    /// Other error with message.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a general other error.
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    /// Whether a fresh attempt at the same transfer may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Nack)
    }
}
