//! Protocol error taxonomy.
//!
//! The split matters for retry policy: transport symptoms (no
//! response, CRC mismatch, NACK) are worth a bounded number of fresh
//! attempts, while a chip rejection is deterministic and retrying it
//! only burns the limited attempt counters some chip families keep
//! for locked-zone operations.

use thiserror::Error;

use crate::command::ChipStatus;
use crate::transport::TransportError;

/// Result type for chip protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for chip protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The chip never produced a response within the poll budget.
    #[error("No response from chip after {attempts} poll attempts")]
    NoResponse {
        /// Number of reads attempted.
        attempts: usize,
    },

    /// The chip signalled it has no data to return (count byte 0xFF).
    #[error("Chip returned no data")]
    NoData,

    /// The response CRC did not match its contents.
    #[error("Response CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    CrcMismatch {
        /// CRC computed over the received bytes.
        computed: u16,
        /// CRC carried in the response trailer.
        received: u16,
    },

    /// The response envelope is malformed.
    #[error("Invalid response: {0}")]
    InvalidResponse(&'static str),

    /// The chip executed the command and rejected it.
    #[error("Chip rejected command: {0}")]
    Chip(ChipStatus),

    /// A payload did not have the size the command requires.
    #[error("Invalid length for {what}: expected {expected}, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl Error {
    /// Whether a fresh attempt at the same command may succeed.
    ///
    /// Chip rejections are only retryable when the chip itself reports
    /// a communication error on the inbound frame.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::NoResponse { .. } | Self::NoData | Self::CrcMismatch { .. } => true,
            Self::Chip(status) => status.is_transient(),
            Self::InvalidResponse(_) | Self::InvalidLength { .. } => false,
        }
    }
}
