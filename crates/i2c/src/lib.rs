//! Linux hardware adapters for the hexmark provisioner.
//!
//! Thin glue between the kernel's I2C and GPIO character devices and
//! the traits the protocol and badge layers define. No protocol logic
//! lives here.

mod board;
mod eeprom;
mod transport;

pub use board::{BoardPins, CdevBoard};
pub use eeprom::I2cEeprom;
pub use transport::LinuxI2cTransport;

/// 7-bit bus address of the secure element (0xC8 in 8-bit notation).
pub const CHIP_ADDRESS: u16 = 0xC8 >> 1;

/// 7-bit bus address of the identity EEPROM.
pub const EEPROM_ADDRESS: u16 = 0x57;
