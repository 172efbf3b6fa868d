//! The chip's internal hash chain, reproduced in software.
//!
//! Every function here is pure and side-effect free. The exact byte
//! layouts (fixed serial bytes, zero padding runs, opcode/mode bytes)
//! mirror what the chip hashes internally; they are covered by
//! known-answer tests because a single wrong pad length silently
//! breaks every derived key.

use sha2::{Digest, Sha256};

use hexmark_sha204::Opcode;

use crate::{Block, Serial};

/// Fixed serial bytes of the chip family, in the order the hash chain
/// consumes them: sn\[8\], sn\[0\], sn\[1\].
const SN_FIXED: [u8; 3] = [0xEE, 0x01, 0x23];

/// Derive the diversified per-device key from a root key and the
/// device serial number.
///
/// This emulates the chip's DeriveKey command (opcode 0x1C, target
/// slot in param2): the same inputs always produce the same key, which
/// is how one factory root key becomes a unique per-unit secret
/// without storing anything per unit.
pub fn diversified_key(root_key: &Block, target_slot: u16, serial: &Serial) -> Block {
    let mut hasher = Sha256::new();
    hasher.update(root_key);
    hasher.update([
        Opcode::DeriveKey as u8,
        0x04,
        target_slot as u8,
        (target_slot >> 8) as u8,
    ]);
    hasher.update(SN_FIXED);
    hasher.update([0u8; 25]);
    hasher.update(serial);
    hasher.update([0u8; 23]);
    hasher.finalize().into()
}

/// The chip's internal nonce-mixing step for generated nonce modes:
/// `SHA-256(seed ++ input ++ [0x16, mode, 0x00])`.
///
/// For pass-through mode no mixing happens; the caller-supplied value
/// is the register content verbatim and this function is not used.
pub fn mixed_nonce(seed: &Block, input: &[u8; 20], mode: u8) -> Block {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(input);
    hasher.update([Opcode::Nonce as u8, mode, 0x00]);
    hasher.finalize().into()
}

/// The register value after a GenDig against `slot`: this is the
/// session key ("tempkey") authorizing exactly one encrypted
/// operation under the current nonce.
pub fn session_key(slot_key: &Block, slot: u8, serial: &Serial, chip_nonce: &Block) -> Block {
    let mut hasher = Sha256::new();
    hasher.update(slot_key);
    hasher.update([
        Opcode::GenDig as u8,
        0x02,
        slot,
        0x00,
        serial[8],
        serial[0],
        serial[1],
    ]);
    hasher.update([0u8; 25]);
    hasher.update(chip_nonce);
    hasher.finalize().into()
}

/// XOR a 32-byte block with the session key. Self-inverse: the same
/// call encrypts and decrypts.
pub fn xor_block(data: &Block, key: &Block) -> Block {
    let mut out = [0u8; 32];
    for (o, (d, k)) in out.iter_mut().zip(data.iter().zip(key)) {
        *o = d ^ k;
    }
    out
}

/// The authorizing MAC for an encrypted write of `plaintext` to
/// `slot`. The chip recomputes this from its own register state and
/// refuses the write on mismatch.
pub fn write_mac(session_key: &Block, slot: u8, serial: &Serial, plaintext: &Block) -> Block {
    let addr = (slot as u16) << 3;
    let mut hasher = Sha256::new();
    hasher.update(session_key);
    hasher.update([
        Opcode::Write as u8,
        0x82,
        addr as u8,
        (addr >> 8) as u8,
        serial[8],
        serial[0],
        serial[1],
    ]);
    hasher.update([0u8; 25]);
    hasher.update(plaintext);
    hasher.finalize().into()
}

/// The 13-byte "other data" a CheckMac carries: the Mac command
/// encoding (opcode, mode, param2) whose output is being verified,
/// padded with zeros.
pub fn mac_other_data(mode: u8, slot: u8) -> [u8; 13] {
    let mut other = [0u8; 13];
    other[0] = Opcode::Mac as u8;
    other[1] = mode;
    other[2] = slot;
    other
}

/// The Mac message: `key ++ challenge ++ other_data` with the fixed
/// serial bytes interleaved at the positions the chip fills from its
/// own serial number and OTP region.
pub fn mac_response(key: &Block, challenge: &Block, other_data: &[u8; 13]) -> Block {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(challenge);
    hasher.update(&other_data[0..4]);
    hasher.update([0u8; 8]);
    hasher.update(&other_data[4..7]);
    hasher.update([SN_FIXED[0]]);
    hasher.update(&other_data[7..11]);
    hasher.update([SN_FIXED[1], SN_FIXED[2]]);
    hasher.update(&other_data[11..13]);
    hasher.finalize().into()
}

/// Pad or truncate a badge identifier (e.g. a MAC address string) to
/// the 20-byte Nonce input field.
pub fn format_challenge_input(id: &str) -> [u8; 20] {
    let mut out = [0u8; 20];
    let bytes = id.as_bytes();
    let len = bytes.len().min(20);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}
