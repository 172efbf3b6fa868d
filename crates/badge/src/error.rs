//! Error type for badge operations.

use thiserror::Error;

use crate::provision::ProvisionState;

/// Result type for badge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for badge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Chip protocol errors, propagated unchanged.
    #[error(transparent)]
    Protocol(#[from] hexmark_sha204::Error),

    /// A provisioning step was attempted out of order. Transitions are
    /// forward-only because locking cannot be undone.
    #[error("Cannot {operation} in state {state:?}")]
    OutOfOrder {
        operation: &'static str,
        state: ProvisionState,
    },

    /// The read-back zone image does not match the intended image, so
    /// the computed lock checksum would freeze the wrong contents.
    /// Fatal: the lock must not be attempted.
    #[error("Zone image mismatch before lock: first differing byte at offset {offset}")]
    ChecksumPrecondition {
        /// Offset of the first byte that differs.
        offset: usize,
    },

    /// A key slot failed post-provisioning verification.
    #[error("Key verification failed for slot {slot}")]
    KeyVerificationFailed { slot: u8 },

    /// The connected chip is not the expected family.
    #[error("Chip family check failed: fixed serial bytes do not match")]
    WrongChipFamily,

    /// No key configured for a slot the operation needs.
    #[error("Secrets store has no key for slot {slot}")]
    MissingKey { slot: u8 },

    /// Secrets store file could not be read or parsed.
    #[error("Invalid secrets store: {0}")]
    InvalidSecrets(String),

    /// The reported response does not match the expected response.
    #[error("Challenge response mismatch")]
    ChallengeMismatch,

    /// Board or EEPROM access failed.
    #[error(transparent)]
    Board(#[from] crate::board::BoardError),

    /// The EEPROM identity header failed validation.
    #[error("EEPROM header invalid: {0}")]
    BadHeader(&'static str),
}
