//! Server-side validation of a badge challenge.
//!
//! Pure mirror of the on-chip Mac path: given what crossed the trust
//! boundary (serial, the chip's random seed, the challenge input) and
//! the root key the server holds, compute the response the genuine
//! device must have produced. Equality is the sole authentication
//! decision; there is no tolerance or partial match.

use crate::crypto::{diversified_key, mac_other_data, mac_response, mixed_nonce};
use crate::{Block, Serial};

/// Mode byte of the Mac command the device ran: the register
/// (tempkey) supplies the challenge half of the message.
const MAC_MODE_TEMPKEY: u8 = 0x01;

/// Slot holding the diversified per-device key on field badges.
pub const FIELD_KEY_SLOT: u8 = 0x00;

/// Compute the response a genuine device produces for this challenge.
///
/// No transport involved: the per-device key is re-derived from the
/// root key and serial, the register content from the seed and
/// challenge input, and the Mac message from both.
pub fn expected_response(
    serial: &Serial,
    device_random: &Block,
    challenge_input: &[u8; 20],
    root_key: &Block,
    slot: u8,
) -> Block {
    let device_key = diversified_key(root_key, FIELD_KEY_SLOT as u16, serial);
    let tempkey = mixed_nonce(device_random, challenge_input, 0x00);
    let other_data = mac_other_data(MAC_MODE_TEMPKEY, slot);
    mac_response(&device_key, &tempkey, &other_data)
}

/// Byte-for-byte comparison of the device's reported response against
/// the recomputed one.
pub fn validate(
    serial: &Serial,
    device_random: &Block,
    challenge_input: &[u8; 20],
    root_key: &Block,
    slot: u8,
    reported: &Block,
) -> bool {
    expected_response(serial, device_random, challenge_input, root_key, slot) == *reported
}
