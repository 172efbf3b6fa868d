//! Multi-command cryptographic sequences against a live chip.
//!
//! Each operation here spans a Nonce and the commands that depend on
//! the register state it creates, so it takes the [`ChipClient`] by
//! exclusive borrow for the whole sequence: an interleaved command
//! from anywhere else would corrupt the chip-global register. A
//! session key authorizes exactly one dependent operation; every
//! function performs its own Nonce.

use tracing::debug;

use hexmark_sha204::{
    ChipClient, ChipStatus, ChipTransport, MacMode, NonceMode, Opcode, Size, Zone,
};

use crate::crypto::{mac_other_data, mac_response, mixed_nonce, session_key, write_mac, xor_block};
use crate::error::{Error, Result};
use crate::{Block, Serial};

/// GenDig "other data" required when the referenced slot is
/// check-only: the GenDig command encoding itself.
fn gen_dig_other_data(slot: u8) -> [u8; 4] {
    [Opcode::GenDig as u8, 0x02, slot, 0x00]
}

/// How the chip's register is loaded ahead of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNonce {
    /// Mix chip randomness into the register, updating the stored seed.
    Generated,
    /// As [`Self::Generated`] without updating the stored seed.
    GeneratedNoSeedUpdate,
    /// Load a fixed 32-byte value into the register verbatim. The
    /// session key becomes fully host-determined.
    Passthrough(Block),
}

impl SessionNonce {
    const fn mode(self) -> NonceMode {
        match self {
            Self::Generated => NonceMode::Random,
            Self::GeneratedNoSeedUpdate => NonceMode::RandomNoSeedUpdate,
            Self::Passthrough(_) => NonceMode::Passthrough,
        }
    }
}

/// Run Nonce + GenDig and compute the resulting register value in
/// software. Returns the session key now loaded in the chip.
fn establish_session<T: ChipTransport>(
    chip: &mut ChipClient<T>,
    key_slot: u8,
    key: &Block,
    serial: &Serial,
    nonce: SessionNonce,
) -> Result<Block> {
    let chip_nonce = match nonce {
        SessionNonce::Passthrough(value) => {
            chip.nonce(NonceMode::Passthrough, &value)?;
            value
        }
        generated => {
            let input = [0u8; 20];
            let output = chip.nonce(generated.mode(), &input)?;
            let seed = output
                .seed()
                .ok_or(hexmark_sha204::Error::InvalidResponse("missing nonce seed"))?;
            mixed_nonce(seed, &input, generated.mode() as u8)
        }
    };

    chip.gen_dig(Zone::Data, key_slot, &gen_dig_other_data(key_slot))?;
    Ok(session_key(key, key_slot, serial, &chip_nonce))
}

/// Read a protected slot: fetch the ciphertext and XOR it with the
/// session key derived from the slot's read key.
pub fn encrypted_read<T: ChipTransport>(
    chip: &mut ChipClient<T>,
    slot: u8,
    read_key_slot: u8,
    read_key: &Block,
    nonce: SessionNonce,
) -> Result<Block> {
    let serial = chip.serial_number()?;
    let key = establish_session(chip, read_key_slot, read_key, &serial, nonce)?;

    let data = chip.read(Zone::Data, slot, 0, Size::Block)?;
    let mut cipher = [0u8; 32];
    cipher.copy_from_slice(&data);
    Ok(xor_block(&cipher, &key))
}

/// Write a protected slot: XOR the plaintext with the session key and
/// attach the MAC the chip will verify against its own register state.
pub fn encrypted_write<T: ChipTransport>(
    chip: &mut ChipClient<T>,
    slot: u8,
    data: &Block,
    write_key_slot: u8,
    write_key: &Block,
    nonce: SessionNonce,
) -> Result<()> {
    let serial = chip.serial_number()?;
    let key = establish_session(chip, write_key_slot, write_key, &serial, nonce)?;

    let cipher = xor_block(data, &key);
    let mac = write_mac(&key, slot, &serial, data);

    debug!(slot, write_key_slot, "encrypted write");
    // The encrypted flag is ignored once the zones are locked; the MAC
    // is what authorizes the write.
    chip.write(Zone::Data, slot, 0, &cipher, Some(&mac), false)?;
    Ok(())
}

/// Prove that `key` matches the contents of `slot` without reading the
/// slot back: compute the expected Mac response over a zero challenge
/// locally and let the chip verify it via CheckMac.
pub fn check_key<T: ChipTransport>(chip: &mut ChipClient<T>, slot: u8, key: &Block) -> Result<()> {
    let challenge = [0u8; 32];
    let other_data = mac_other_data(0x00, slot);
    let response = mac_response(key, &challenge, &other_data);

    match chip.check_mac(slot, &challenge, &response, &other_data, Default::default()) {
        Ok(()) => Ok(()),
        Err(hexmark_sha204::Error::Chip(ChipStatus::CheckMacMiscompare)) => {
            Err(Error::KeyVerificationFailed { slot })
        }
        Err(e) => Err(e.into()),
    }
}

/// Field authentication flow: load the register from a generated nonce
/// over the badge's identifying data, then have the chip Mac its
/// stored key against the register. Only {serial, seed, response}
/// cross the trust boundary; the validator recomputes the rest.
pub fn perform_challenge<T: ChipTransport>(
    chip: &mut ChipClient<T>,
    slot: u8,
    input: &[u8; 20],
) -> Result<(Block, Block)> {
    let output = chip.nonce(NonceMode::Random, input)?;
    let seed = *output
        .seed()
        .ok_or(hexmark_sha204::Error::InvalidResponse("missing nonce seed"))?;

    let response = chip.mac(slot, &[], MacMode::tempkey_challenge())?;
    Ok((seed, response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, Bytes, BytesMut};
    use hexmark_sha204::transport::mock::MockTransport;
    use hexmark_sha204::crc16;
    use std::time::Duration;

    const SERIAL: Serial = [0x01, 0x23, 0x5D, 0xC2, 0x51, 0x2D, 0xB7, 0x61, 0xEE];

    fn response(data: &[u8]) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(data.len() as u8 + 3);
        out.put_slice(data);
        let crc = crc16(&out);
        out.put_u16_le(crc);
        out.freeze()
    }

    fn serial_block() -> [u8; 32] {
        let mut block = [0u8; 32];
        block[..4].copy_from_slice(&SERIAL[..4]);
        block[8..13].copy_from_slice(&SERIAL[4..]);
        block
    }

    fn from_hex(s: &str) -> Block {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).unwrap();
        out
    }

    fn client(responses: Vec<Bytes>) -> ChipClient<MockTransport> {
        ChipClient::new(MockTransport::new(responses)).with_polling(10, Duration::from_millis(1))
    }

    #[test]
    fn encrypted_write_sends_ciphertext_and_mac() {
        let seed = from_hex("4eab86b4fce839605cb5e09fb84860db4e5fe3678186ff17fc88b02eeaf423cb");
        let responses = vec![
            response(&serial_block()), // serial number read
            response(&seed),           // nonce seed
            response(&[0x00]),         // gendig ok
            response(&[0x00]),         // write ok
        ];
        let mut chip = client(responses);

        let write_key =
            from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let plain = from_hex("00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff");
        encrypted_write(&mut chip, 3, &plain, 0x0E, &write_key, SessionNonce::Generated).unwrap();

        let writes = chip.into_transport().writes;
        assert_eq!(writes.len(), 4);

        // GenDig carries the check-only preamble for the key slot.
        assert_eq!(&writes[2][6..10], &[0x15, 0x02, 0x0E, 0x00]);

        // Write payload: ciphertext then MAC, both matching the
        // software-computed hash chain (KAT vectors).
        let frame = &writes[3];
        assert_eq!(
            &frame[6..38],
            from_hex("213dc57846473c2b6ee1531a40cba54abd16c04f68bbbbe388f2cfbbb0774351")
                .as_slice()
        );
        assert_eq!(
            &frame[38..70],
            from_hex("9aae06d87f845b6cf586cf21ddd8e18bc71ccbbf6c684218a5cd28329ac15382")
                .as_slice()
        );
    }

    #[test]
    fn encrypted_read_round_trips() {
        let seed = from_hex("4eab86b4fce839605cb5e09fb84860db4e5fe3678186ff17fc88b02eeaf423cb");
        let read_key = from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let plain = from_hex("00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff");

        // Precompute what the chip would hand back: the slot contents
        // XORed with the session key.
        let nonce = mixed_nonce(&seed, &[0u8; 20], 0x00);
        let key = session_key(&read_key, 0x0E, &SERIAL, &nonce);
        let cipher = xor_block(&plain, &key);

        let responses = vec![
            response(&serial_block()),
            response(&seed),
            response(&[0x00]),
            response(&cipher),
        ];
        let mut chip = client(responses);

        let data = encrypted_read(&mut chip, 8, 0x0E, &read_key, SessionNonce::Generated).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn encrypted_read_with_fixed_nonce_skips_the_seed() {
        let read_key = from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        let plain = from_hex("00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff");
        let fixed = from_hex("fefefefefefefefefefefefefefefefe01010101010101010101010101010101");

        // With a fixed register value the session key is determined
        // entirely by host-side inputs.
        let key = session_key(&read_key, 0x0E, &SERIAL, &fixed);
        let cipher = xor_block(&plain, &key);

        let responses = vec![
            response(&serial_block()),
            response(&[0x00]), // nonce ack, no seed returned
            response(&[0x00]),
            response(&cipher),
        ];
        let mut chip = client(responses);

        let data =
            encrypted_read(&mut chip, 8, 0x0E, &read_key, SessionNonce::Passthrough(fixed))
                .unwrap();
        assert_eq!(data, plain);

        let writes = chip.into_transport().writes;
        // Nonce command carries the pass-through mode and the full value.
        let frame = &writes[1];
        assert_eq!(frame[2], 0x16);
        assert_eq!(frame[3], 0x03);
        assert_eq!(&frame[6..38], fixed.as_slice());
    }

    #[test]
    fn check_key_miscompare_names_the_slot() {
        let mut chip = client(vec![response(&[0x01])]);
        let err = check_key(&mut chip, 5, &[0u8; 32]).unwrap_err();
        assert!(matches!(err, Error::KeyVerificationFailed { slot: 5 }));
    }

    #[test]
    fn check_key_sends_expected_response() {
        let mut chip = client(vec![response(&[0x00])]);
        let key = from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        check_key(&mut chip, 5, &key).unwrap();

        let writes = chip.into_transport().writes;
        let frame = &writes[0];
        // Payload: 32-byte zero challenge, 32-byte response, 13 bytes other data.
        assert_eq!(&frame[6..38], &[0u8; 32]);
        assert_eq!(
            &frame[38..70],
            from_hex("23507866188b24c8fc794c6257d9bac27372526815f0371f18f325ab58ce7767")
                .as_slice()
        );
        assert_eq!(&frame[70..73], &[0x08, 0x00, 0x05]);
    }

    #[test]
    fn challenge_returns_seed_and_response() {
        let seed = from_hex("4eab86b4fce839605cb5e09fb84860db4e5fe3678186ff17fc88b02eeaf423cb");
        let mac = from_hex("bb2a212374ea8ce542f2bce03f2d117e10d3303760e24e96072e36a50f2023bd");
        let mut chip = client(vec![response(&seed), response(&mac)]);

        let (got_seed, got_mac) = perform_challenge(&mut chip, 0, &[0u8; 20]).unwrap();
        assert_eq!(got_seed, seed);
        assert_eq!(got_mac, mac);

        let writes = chip.into_transport().writes;
        // Mac command uses the register as the challenge (mode bit 0).
        assert_eq!(writes[1][3], 0x01);
        assert_eq!(writes[1][1], 0x07);
    }
}
