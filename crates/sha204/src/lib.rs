//! ATSHA204A command protocol layer.
//!
//! This crate speaks the chip's binary command protocol over an abstract
//! byte transport: it frames commands, appends the chip's 16-bit CRC,
//! polls for responses on a bus that NACKs while the chip is busy, and
//! exposes the command set (Read, Write, Nonce, GenDig, Mac, CheckMac,
//! Lock) as typed operations.
//!
//! It contains no key material and no hash-chain logic; the session-key
//! and provisioning layers live in `hexmark-badge`.

pub mod client;
pub mod command;
pub mod crc;
pub mod device;
pub mod error;
pub mod retry;
pub mod transport;

pub use client::ChipClient;
pub use command::{
    CheckMacMode, ChipStatus, LockZone, MacMode, NonceMode, NonceOutput, Opcode, Size, Zone,
};
pub use crc::crc16;
pub use error::{Error, Result};
pub use transport::{ChipTransport, TransportError};

/// Length of the chip's unique serial number.
pub const SERIAL_LEN: usize = 9;

/// Size of the configuration zone in bytes.
pub const CONFIG_ZONE_LEN: usize = 88;

/// Every variable-length command in this chip family fits in a 38 byte
/// response buffer (count + 32 data bytes + CRC, padded by the bus).
pub const RESPONSE_LEN: usize = 38;

/// Fixed serial number bytes common to the whole chip family.
/// `serial[0..2]` is always `01 23` and `serial[8]` is always `EE`.
pub const SN_HEAD: [u8; 2] = [0x01, 0x23];
/// Last fixed serial byte, see [`SN_HEAD`].
pub const SN_TAIL: u8 = 0xEE;
