//! Typed chip operations built on the command codec.
//!
//! Each operation is a thin wrapper over [`ChipClient::send_command`]
//! encoding the documented param1/param2 rules. All variable commands
//! in this chip family use a 38-byte response buffer.

use bytes::Bytes;
use tracing::debug;

use crate::client::ChipClient;
use crate::command::{
    zone_address, CheckMacMode, LockZone, MacMode, NonceMode, NonceOutput, Opcode, Size, Zone,
};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::transport::ChipTransport;
use crate::{CONFIG_ZONE_LEN, RESPONSE_LEN, SERIAL_LEN, SN_HEAD, SN_TAIL};

/// Encrypted-write flag bit in param1 of a Write command.
const WRITE_ENCRYPTED: u8 = 1 << 6;

/// Retry bound for the plain reads used while assembling the config image.
const CONFIG_READ_ATTEMPTS: usize = 5;

impl<T: ChipTransport> ChipClient<T> {
    /// Read a word or block from a memory zone.
    pub fn read(&mut self, zone: Zone, block: u8, offset: u8, size: Size) -> Result<Bytes> {
        let param1 = zone as u8 | size.param1_bits();
        let data = self.send_command(
            Opcode::Read,
            param1,
            zone_address(block, offset),
            &[],
            RESPONSE_LEN,
        )?;
        if data.len() < size.len() {
            return Err(Error::InvalidLength {
                what: "read response",
                expected: size.len(),
                actual: data.len(),
            });
        }
        Ok(data.slice(..size.len()))
    }

    /// Write a word or block to a memory zone.
    ///
    /// `mac` carries the 32-byte authorizing MAC for writes to
    /// protected slots; plain writes pass `None`. The encrypted flag
    /// is only honoured by the chip before the zone is locked, but the
    /// bit encoding is preserved either way.
    pub fn write(
        &mut self,
        zone: Zone,
        block: u8,
        offset: u8,
        data: &[u8],
        mac: Option<&[u8; 32]>,
        encrypted: bool,
    ) -> Result<()> {
        let size = match data.len() {
            4 => Size::Word,
            32 => Size::Block,
            actual => {
                return Err(Error::InvalidLength {
                    what: "write data",
                    expected: 32,
                    actual,
                })
            }
        };
        let mut param1 = zone as u8 | size.param1_bits();
        if encrypted {
            param1 |= WRITE_ENCRYPTED;
        }

        let mut payload = Vec::with_capacity(data.len() + 32);
        payload.extend_from_slice(data);
        if let Some(mac) = mac {
            payload.extend_from_slice(mac);
        }

        self.send_command(
            Opcode::Write,
            param1,
            zone_address(block, offset),
            &payload,
            RESPONSE_LEN,
        )?;
        Ok(())
    }

    /// Load the chip's internal register through the Nonce command.
    ///
    /// Pass-through mode takes a 32-byte value verbatim and the chip
    /// answers with a status byte; generated modes take up to 20 input
    /// bytes and return the random seed the chip mixed in.
    pub fn nonce(&mut self, mode: NonceMode, input: &[u8]) -> Result<NonceOutput> {
        match mode {
            NonceMode::Passthrough => {
                if input.len() != 32 {
                    return Err(Error::InvalidLength {
                        what: "nonce pass-through value",
                        expected: 32,
                        actual: input.len(),
                    });
                }
            }
            NonceMode::Random | NonceMode::RandomNoSeedUpdate => {
                if input.len() > 20 {
                    return Err(Error::InvalidLength {
                        what: "nonce input",
                        expected: 20,
                        actual: input.len(),
                    });
                }
            }
        }

        let data = self.send_command(Opcode::Nonce, mode as u8, 0x0000, input, RESPONSE_LEN)?;
        match mode {
            NonceMode::Passthrough => Ok(NonceOutput::Accepted),
            NonceMode::Random | NonceMode::RandomNoSeedUpdate => {
                let seed: [u8; 32] = data
                    .get(..32)
                    .and_then(|s| s.try_into().ok())
                    .ok_or(Error::InvalidLength {
                        what: "nonce seed",
                        expected: 32,
                        actual: data.len(),
                    })?;
                Ok(NonceOutput::Seed(seed))
            }
        }
    }

    /// Mix a slot key into the internal register (GenDig). Required
    /// before any encrypted operation referencing that slot; check-only
    /// keys additionally require the 4-byte `other_data` preamble.
    pub fn gen_dig(&mut self, zone: Zone, slot: u8, other_data: &[u8]) -> Result<()> {
        self.send_command(
            Opcode::GenDig,
            zone as u8,
            slot as u16,
            other_data,
            RESPONSE_LEN,
        )?;
        Ok(())
    }

    /// Compute the chip-side keyed response over 32 bytes.
    pub fn mac(&mut self, slot: u8, challenge: &[u8], mode: MacMode) -> Result<[u8; 32]> {
        let data = self.send_command(
            Opcode::Mac,
            mode.param1(),
            slot as u16,
            challenge,
            RESPONSE_LEN,
        )?;
        data.get(..32)
            .and_then(|s| s.try_into().ok())
            .ok_or(Error::InvalidLength {
                what: "mac response",
                expected: 32,
                actual: data.len(),
            })
    }

    /// Verify a client {challenge, response} pair against a slot key.
    ///
    /// A mismatch surfaces as `Error::Chip(CheckMacMiscompare)`; that
    /// is the chip's verdict, not a transport fault.
    pub fn check_mac(
        &mut self,
        slot: u8,
        client_challenge: &[u8; 32],
        client_response: &[u8; 32],
        other_data: &[u8; 13],
        mode: CheckMacMode,
    ) -> Result<()> {
        let mut payload = Vec::with_capacity(32 + 32 + 13);
        payload.extend_from_slice(client_challenge);
        payload.extend_from_slice(client_response);
        payload.extend_from_slice(other_data);

        self.send_command(
            Opcode::CheckMac,
            mode.param1(),
            slot as u16,
            &payload,
            RESPONSE_LEN,
        )?;
        Ok(())
    }

    /// Irreversibly lock a zone. `checksum` must be the CRC over the
    /// exact final byte image of the zone; callers are expected to have
    /// verified it against a read-back before getting here.
    pub fn lock(&mut self, zone: LockZone, checksum: u16, skip_crc: bool) -> Result<()> {
        debug!(?zone, checksum = format_args!("{checksum:#06x}"), "locking zone");
        self.send_command(
            Opcode::Lock,
            zone.param1(skip_crc),
            checksum,
            &[],
            RESPONSE_LEN,
        )?;
        Ok(())
    }

    /// Read the 9-byte serial number out of the config zone header
    /// (bytes 0..4 and 8..13 of block 0).
    pub fn serial_number(&mut self) -> Result<[u8; SERIAL_LEN]> {
        let block = self.read(Zone::Config, 0, 0, Size::Block)?;
        let mut serial = [0u8; SERIAL_LEN];
        serial[..4].copy_from_slice(&block[..4]);
        serial[4..].copy_from_slice(&block[8..13]);
        Ok(serial)
    }

    /// Check the fixed family bytes of the serial number.
    pub fn check_chip_id(&mut self) -> Result<bool> {
        let serial = self.serial_number()?;
        Ok(serial[..2] == SN_HEAD && serial[8] == SN_TAIL)
    }

    /// Read the entire 88-byte configuration zone: two 32-byte blocks
    /// followed by six 4-byte words, each read under a bounded retry.
    pub fn read_config(&mut self) -> Result<[u8; CONFIG_ZONE_LEN]> {
        let mut config = [0u8; CONFIG_ZONE_LEN];

        for block in 0..2u8 {
            let data = with_retry(CONFIG_READ_ATTEMPTS, || {
                self.read(Zone::Config, block, 0, Size::Block)
            })?;
            config[block as usize * 32..][..32].copy_from_slice(&data);
        }
        for offset in 0..6u8 {
            let data = with_retry(CONFIG_READ_ATTEMPTS, || {
                self.read(Zone::Config, 2, offset, Size::Word)
            })?;
            config[64 + offset as usize * 4..][..4].copy_from_slice(&data);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16;
    use crate::transport::mock::MockTransport;
    use bytes::{BufMut, BytesMut};
    use std::time::Duration;

    fn response(data: &[u8]) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(data.len() as u8 + 3);
        out.put_slice(data);
        let crc = crc16(&out);
        out.put_u16_le(crc);
        out.freeze()
    }

    fn client(responses: Vec<Bytes>) -> ChipClient<MockTransport> {
        ChipClient::new(MockTransport::new(responses)).with_polling(10, Duration::from_millis(1))
    }

    fn serial_block() -> [u8; 32] {
        let mut block = [0u8; 32];
        block[..4].copy_from_slice(&[0x01, 0x23, 0x5D, 0xC2]);
        block[8..13].copy_from_slice(&[0x51, 0x2D, 0xB7, 0x61, 0xEE]);
        block
    }

    #[test]
    fn read_encodes_zone_and_size_bits() {
        let mut chip = client(vec![response(&[0xAB; 32])]);
        let data = chip.read(Zone::Data, 3, 0, Size::Block).unwrap();
        assert_eq!(data.len(), 32);

        let frame = &chip.into_transport().writes[0];
        // param1: data zone with the additive 32-byte flag.
        assert_eq!(frame[3], 0x82);
        // param2: (3 << 3) + 0.
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 0x18);
    }

    #[test]
    fn word_read_returns_four_bytes() {
        let mut chip = client(vec![response(&[0x55, 0x00, 0x00, 0x00])]);
        let data = chip.read(Zone::Config, 2, 5, Size::Word).unwrap();
        assert_eq!(data.as_ref(), &[0x55, 0x00, 0x00, 0x00]);

        let frame = &chip.into_transport().writes[0];
        assert_eq!(frame[3], 0x00);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 0x15);
    }

    #[test]
    fn write_appends_mac_and_sets_flags() {
        let mut chip = client(vec![response(&[0x00])]);
        let data = [0x11; 32];
        let mac = [0x22; 32];
        chip.write(Zone::Data, 7, 0, &data, Some(&mac), true)
            .unwrap();

        let frame = &chip.into_transport().writes[0];
        assert_eq!(frame[1], 0x07 + 64);
        assert_eq!(frame[3], 0x02 | 0x80 | 0x40);
        assert_eq!(&frame[6..38], &data);
        assert_eq!(&frame[38..70], &mac);
    }

    #[test]
    fn write_rejects_odd_lengths() {
        let mut chip = client(vec![]);
        let err = chip
            .write(Zone::Data, 0, 0, &[0u8; 7], None, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLength { .. }));
    }

    #[test]
    fn nonce_passthrough_returns_accepted() {
        let mut chip = client(vec![response(&[0x00])]);
        let value = [0x5A; 32];
        let out = chip.nonce(NonceMode::Passthrough, &value).unwrap();
        assert_eq!(out, NonceOutput::Accepted);

        let frame = &chip.into_transport().writes[0];
        assert_eq!(frame[3], 0x03);
    }

    #[test]
    fn nonce_rejects_oversize_input_before_framing() {
        // An oversize payload would overflow the frame's count byte,
        // so it must be refused before anything reaches the bus.
        let mut chip = client(vec![]);
        let err = chip.nonce(NonceMode::Random, &[0u8; 21]).unwrap_err();
        assert!(matches!(err, Error::InvalidLength { expected: 20, .. }));

        let err = chip
            .nonce(NonceMode::Passthrough, &[0u8; 20])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLength { expected: 32, .. }));

        assert!(chip.into_transport().writes.is_empty());
    }

    #[test]
    fn nonce_generated_returns_seed() {
        let seed = [0xC3; 32];
        let mut chip = client(vec![response(&seed)]);
        let out = chip.nonce(NonceMode::Random, &[0u8; 20]).unwrap();
        assert_eq!(out.seed(), Some(&seed));
    }

    #[test]
    fn checkmac_miscompare_is_chip_error() {
        let mut chip = client(vec![response(&[0x01])]);
        let err = chip
            .check_mac(
                0,
                &[0u8; 32],
                &[0u8; 32],
                &[0u8; 13],
                CheckMacMode::default(),
            )
            .unwrap_err();
        match err {
            Error::Chip(status) => assert_eq!(status.code(), 0x01),
            other => panic!("expected chip error, got {other:?}"),
        }
    }

    #[test]
    fn serial_number_splices_config_header() {
        let mut chip = client(vec![response(&serial_block())]);
        let serial = chip.serial_number().unwrap();
        assert_eq!(
            serial,
            [0x01, 0x23, 0x5D, 0xC2, 0x51, 0x2D, 0xB7, 0x61, 0xEE]
        );
    }

    #[test]
    fn chip_id_checks_fixed_bytes() {
        let mut chip = client(vec![response(&serial_block())]);
        assert!(chip.check_chip_id().unwrap());

        let mut bad = serial_block();
        bad[0] = 0x02;
        let mut chip = client(vec![response(&bad)]);
        assert!(!chip.check_chip_id().unwrap());
    }

    #[test]
    fn read_config_assembles_88_bytes() {
        let mut responses = Vec::new();
        responses.push(response(&[0x00; 32]));
        responses.push(response(&[0x11; 32]));
        for word in 0..6u8 {
            responses.push(response(&[word; 4]));
        }
        let mut chip = client(responses);
        let config = chip.read_config().unwrap();
        assert_eq!(&config[..32], &[0x00; 32]);
        assert_eq!(&config[32..64], &[0x11; 32]);
        assert_eq!(&config[64..68], &[0x00; 4]);
        assert_eq!(&config[84..88], &[0x05; 4]);
    }
}
