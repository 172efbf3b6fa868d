//! Interfaces to the provisioning jig hardware.
//!
//! The cryptographic and state-machine layers never talk to pins or
//! bus adapters directly; they go through these traits so the whole
//! stack runs against test doubles. Concrete Linux implementations
//! live in the `hexmark-transport-i2c` crate.

use thiserror::Error;

/// Error type for board and EEPROM access.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Pin-level control of the provisioning jig.
pub trait BoardControl {
    /// Drive the board's status LED.
    fn set_status_led(&mut self, on: bool) -> Result<(), BoardError>;

    /// Assert or release the EEPROM write-protect line. Released only
    /// while the identity header is being written.
    fn set_eeprom_write_protect(&mut self, protected: bool) -> Result<(), BoardError>;

    /// Block until a board is seated in the jig.
    fn wait_for_insert(&mut self) -> Result<(), BoardError>;

    /// Block until the current board is removed.
    fn wait_for_removal(&mut self) -> Result<(), BoardError>;
}

/// Byte-addressed access to the board's identity EEPROM.
pub trait Eeprom {
    fn read(&mut self, address: u16, len: usize) -> Result<Vec<u8>, BoardError>;

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BoardError>;
}
