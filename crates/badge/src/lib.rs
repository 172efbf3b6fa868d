//! Badge provisioning and field authentication for the ATSHA204A
//! secure element.
//!
//! The chip computes keyed SHA-256 responses internally; this crate
//! reproduces that hash chain in software so the host can derive
//! per-device keys, predict responses and construct values the chip
//! will accept:
//!
//! - [`crypto`] — the shared, pure derivation engine. Used by both the
//!   device-facing session operations and the server-side validator,
//!   so the two mirrors cannot drift apart.
//! - [`session`] — multi-command sequences against a live chip:
//!   encrypted reads/writes, key verification, challenge-response.
//! - [`validator`] — the server side: computes the expected response
//!   with no hardware access.
//! - [`provision`] — the forward-only state machine that writes keys,
//!   locks zones irreversibly and verifies the result.

pub mod board;
pub mod config;
pub mod crypto;
pub mod eeprom;
pub mod error;
pub mod provision;
pub mod registry;
pub mod secrets;
pub mod session;
pub mod validator;

pub use config::{ConfigImage, SlotPolicy};
pub use error::{Error, Result};
pub use provision::{ProvisionState, Provisioner, VerificationReport};
pub use secrets::KeyStore;
pub use session::SessionNonce;

/// A 32-byte key or digest.
pub type Block = [u8; 32];

/// The chip's 9-byte serial number.
pub type Serial = [u8; hexmark_sha204::SERIAL_LEN];

/// Number of key slots in the data zone.
pub const SLOT_COUNT: usize = 16;

/// Number of 32-byte OTP blocks.
pub const OTP_BLOCKS: usize = 2;
