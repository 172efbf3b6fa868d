//! The forward-only provisioning state machine.
//!
//! A factory-fresh chip passes through five states; the two lock
//! transitions are irreversible, so every step checks its
//! precondition before touching the chip and every lock is computed
//! over a fresh read-back of the zone it freezes.
//!
//! ```text
//! Unconfigured -> ConfigWritten -> ConfigLocked -> DataWritten -> DataLocked
//! ```

use tracing::{debug, info};

use hexmark_sha204::retry::with_retry;
use hexmark_sha204::{crc16, ChipClient, ChipTransport, LockZone, Size, Zone};

use crate::config::ConfigImage;
use crate::crypto::diversified_key;
use crate::error::{Error, Result};
use crate::secrets::KeyStore;
use crate::{session, Block, Serial, OTP_BLOCKS, SLOT_COUNT};

/// Lock bytes in the config zone read 0x55 while the zone is open.
const UNLOCKED: u8 = 0x55;

/// Retry bound for the plain pre-lock writes. They are idempotent
/// until the zone locks, so a transient CRC or bus fault costs one
/// retransmit instead of the whole run.
const WRITE_ATTEMPTS: usize = 5;

/// Where the provisioning sequence stands for a given chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    /// Factory state: config zone open, contents unverified.
    Unconfigured,
    /// The intended config image is written but not locked.
    ConfigWritten,
    /// Config zone locked; data and OTP zones writable in cleartext.
    ConfigLocked,
    /// Keys and OTP blocks written but the data zone is still open.
    DataWritten,
    /// Fully provisioned. Keys are no longer readable in cleartext.
    DataLocked,
}

/// Outcome of post-provisioning key verification.
#[derive(Debug, Default)]
pub struct VerificationReport {
    /// Slots whose contents did not match the intended key material.
    pub failures: Vec<u8>,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl std::fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ok() {
            write!(f, "all slots verified")
        } else {
            write!(f, "verification failed for slots {:?}", self.failures)
        }
    }
}

/// OTP content for a free-text badge identifier: the first block holds
/// the identifier padded or truncated to 32 bytes, the second is zero.
pub fn otp_from_id(id: &str) -> [Block; OTP_BLOCKS] {
    let mut first = [0u8; 32];
    let bytes = id.as_bytes();
    let len = bytes.len().min(32);
    first[..len].copy_from_slice(&bytes[..len]);
    [first, [0u8; 32]]
}

/// Drives one chip through the provisioning sequence.
pub struct Provisioner<T: ChipTransport> {
    chip: ChipClient<T>,
    config: ConfigImage,
    keys: KeyStore,
    otp: [Block; OTP_BLOCKS],
    state: ProvisionState,
}

impl<T: ChipTransport> Provisioner<T> {
    pub fn new(chip: ChipClient<T>, config: ConfigImage, keys: KeyStore) -> Self {
        Self {
            chip,
            config,
            keys,
            otp: [[0u8; 32]; OTP_BLOCKS],
            state: ProvisionState::Unconfigured,
        }
    }

    /// Content for the two OTP blocks, written and locked together with
    /// the key slots.
    pub fn with_otp(mut self, otp: [Block; OTP_BLOCKS]) -> Self {
        self.otp = otp;
        self
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    pub fn into_chip(self) -> ChipClient<T> {
        self.chip
    }

    /// Establish where this chip stands by reading its lock bytes.
    ///
    /// Fails with [`Error::WrongChipFamily`] before anything else if the
    /// fixed serial bytes are wrong; locking a foreign chip family with
    /// this image would brick it.
    pub fn sync_state(&mut self) -> Result<ProvisionState> {
        if !self.chip.check_chip_id()? {
            return Err(Error::WrongChipFamily);
        }

        let zone = self.chip.read_config()?;
        self.state = if zone[87] == UNLOCKED {
            if self.config.policy_matches(&zone) {
                ProvisionState::ConfigWritten
            } else {
                ProvisionState::Unconfigured
            }
        } else if zone[86] == UNLOCKED {
            // Data writes before the lock are repeatable, so a chip
            // found here re-enters at the write step.
            ProvisionState::ConfigLocked
        } else {
            ProvisionState::DataLocked
        };

        debug!(state = ?self.state, "synchronized provisioning state");
        Ok(self.state)
    }

    fn expect(&self, allowed: &[ProvisionState], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::OutOfOrder {
                operation,
                state: self.state,
            })
        }
    }

    /// Write the intended config image, one 4-byte word at a time.
    /// Repeatable until the zone is locked.
    pub fn write_config(&mut self) -> Result<()> {
        self.expect(
            &[ProvisionState::Unconfigured, ProvisionState::ConfigWritten],
            "write config",
        )?;

        for (block, offset, word) in self.config.write_words() {
            with_retry(WRITE_ATTEMPTS, || {
                self.chip
                    .write(Zone::Config, block, offset, &word, None, false)
            })?;
        }

        self.state = ProvisionState::ConfigWritten;
        info!("config image written");
        Ok(())
    }

    /// Lock the config zone over a verified read-back.
    ///
    /// The checksum sent with the Lock command is computed over the
    /// read-back image, never over the intended one: if the chip holds
    /// anything else the step aborts before the point of no return.
    pub fn lock_config(&mut self) -> Result<()> {
        self.expect(&[ProvisionState::ConfigWritten], "lock config")?;

        let read_back = self.chip.read_config()?;
        let image = self.config.expected_image(&read_back)?;
        self.chip.lock(LockZone::Config, crc16(&image), false)?;

        self.state = ProvisionState::ConfigLocked;
        info!("config zone locked");
        Ok(())
    }

    /// The plaintext this run intends for a slot: the diversified
    /// per-device key for slot 0, the stored key otherwise.
    fn slot_contents(&self, slot: u8, serial: &Serial) -> Result<Block> {
        if slot == 0 {
            Ok(diversified_key(self.keys.root_key()?, 0, serial))
        } else {
            self.keys.key(slot).copied()
        }
    }

    /// Write all 16 key slots and both OTP blocks in cleartext.
    /// Repeatable until the data lock.
    pub fn write_data(&mut self) -> Result<()> {
        self.expect(
            &[ProvisionState::ConfigLocked, ProvisionState::DataWritten],
            "write data",
        )?;

        let serial = self.chip.serial_number()?;
        for slot in 0..SLOT_COUNT as u8 {
            let contents = self.slot_contents(slot, &serial)?;
            with_retry(WRITE_ATTEMPTS, || {
                self.chip.write(Zone::Data, slot, 0, &contents, None, false)
            })?;
        }
        for (block, contents) in self.otp.iter().enumerate() {
            with_retry(WRITE_ATTEMPTS, || {
                self.chip
                    .write(Zone::Otp, block as u8, 0, contents, None, false)
            })?;
        }

        self.state = ProvisionState::DataWritten;
        info!("key slots and OTP written");
        Ok(())
    }

    /// Lock the data and OTP zones together.
    ///
    /// The lock checksum covers the concatenation of all 16 slot
    /// plaintexts followed by both OTP blocks, in write order.
    pub fn lock_data(&mut self) -> Result<()> {
        self.expect(&[ProvisionState::DataWritten], "lock data")?;

        let serial = self.chip.serial_number()?;
        let mut image = Vec::with_capacity((SLOT_COUNT + OTP_BLOCKS) * 32);
        for slot in 0..SLOT_COUNT as u8 {
            image.extend_from_slice(&self.slot_contents(slot, &serial)?);
        }
        for contents in &self.otp {
            image.extend_from_slice(contents);
        }

        self.chip.lock(LockZone::Data, crc16(&image), false)?;
        self.state = ProvisionState::DataLocked;
        info!("data zone locked");
        Ok(())
    }

    /// Prove every slot of the locked chip holds what this run wrote.
    ///
    /// Secret slots are checked through CheckMac without any key
    /// leaving the chip; public slots are read back and compared. A
    /// mismatch is recorded, not fatal, so one pass reports all bad
    /// slots.
    pub fn verify(&mut self) -> Result<VerificationReport> {
        self.expect(&[ProvisionState::DataLocked], "verify")?;
        self.verify_slots()
    }

    fn verify_slots(&mut self) -> Result<VerificationReport> {
        let serial = self.chip.serial_number()?;
        let mut report = VerificationReport::default();

        for slot in 0..SLOT_COUNT as u8 {
            let expected = self.slot_contents(slot, &serial)?;
            if self.config.slots[slot as usize].secret {
                match session::check_key(&mut self.chip, slot, &expected) {
                    Ok(()) => {}
                    Err(Error::KeyVerificationFailed { .. }) => report.failures.push(slot),
                    Err(e) => return Err(e),
                }
            } else {
                let data = self.chip.read(Zone::Data, slot, 0, Size::Block)?;
                if data.as_ref() != expected {
                    report.failures.push(slot);
                }
            }
        }

        info!(%report, "verification complete");
        Ok(report)
    }

    /// Re-entrant check of an already-provisioned chip: the config
    /// zone must carry this run's slot policy and every slot must
    /// still prove its intended key material.
    ///
    /// Strictly read-only: reads and CheckMac proofs, never a write or
    /// lock, so it is safe to run any number of times against a locked
    /// chip.
    pub fn check_config(&mut self) -> Result<bool> {
        let zone = self.chip.read_config()?;
        if !self.config.policy_matches(&zone) {
            return Ok(false);
        }
        Ok(self.verify_slots()?.is_ok())
    }

    /// Run the remaining provisioning steps for wherever the chip
    /// stands, then verify. Safe to re-run after a partial failure.
    pub fn run(&mut self) -> Result<VerificationReport> {
        self.sync_state()?;

        if matches!(
            self.state,
            ProvisionState::Unconfigured | ProvisionState::ConfigWritten
        ) {
            self.write_config()?;
            self.lock_config()?;
        }
        if matches!(
            self.state,
            ProvisionState::ConfigLocked | ProvisionState::DataWritten
        ) {
            self.write_data()?;
            self.lock_data()?;
        }

        self.verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, Bytes, BytesMut};
    use hexmark_sha204::transport::mock::MockTransport;
    use hexmark_sha204::CONFIG_ZONE_LEN;
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

    fn ack() -> Bytes {
        response(&[0x00])
    }

    fn keystore() -> KeyStore {
        let mut entries = Vec::new();
        for slot in 0..SLOT_COUNT {
            entries.push(format!(r#""{slot:02x}": "{}""#, hex::encode([slot as u8 + 1; 32])));
        }
        KeyStore::from_json(&format!("{{{}}}", entries.join(", "))).unwrap()
    }

    /// A config zone image as a fresh-but-written chip would report it:
    /// the intended image plus the device-fixed header and open locks.
    fn written_zone(config: &ConfigImage) -> [u8; CONFIG_ZONE_LEN] {
        let mut zone = config.render();
        zone[..4].copy_from_slice(&SERIAL[..4]);
        zone[8..13].copy_from_slice(&SERIAL[4..]);
        zone[86] = UNLOCKED;
        zone[87] = UNLOCKED;
        zone
    }

    /// Responses for one full `read_config`: two blocks, six words.
    fn config_reads(zone: &[u8; CONFIG_ZONE_LEN]) -> Vec<Bytes> {
        let mut out = vec![response(&zone[..32]), response(&zone[32..64])];
        for word in 0..6 {
            out.push(response(&zone[64 + word * 4..68 + word * 4]));
        }
        out
    }

    fn provisioner(responses: Vec<Bytes>) -> Provisioner<MockTransport> {
        let chip = ChipClient::new(MockTransport::new(responses))
            .with_polling(10, Duration::from_millis(1));
        Provisioner::new(chip, ConfigImage::badge(0xC8), keystore())
    }

    #[test]
    fn steps_refuse_to_run_out_of_order() {
        // No responses queued: the precondition check must fire before
        // any chip traffic.
        let mut p = provisioner(vec![]);
        assert!(matches!(
            p.lock_config().unwrap_err(),
            Error::OutOfOrder { operation: "lock config", state: ProvisionState::Unconfigured }
        ));
        assert!(matches!(
            p.write_data().unwrap_err(),
            Error::OutOfOrder { .. }
        ));
        assert!(matches!(p.lock_data().unwrap_err(), Error::OutOfOrder { .. }));
        assert!(matches!(p.verify().unwrap_err(), Error::OutOfOrder { .. }));
    }

    #[test]
    fn write_config_sends_seventeen_words() {
        let mut p = provisioner(vec![ack(); 17]);
        p.write_config().unwrap();
        assert_eq!(p.state(), ProvisionState::ConfigWritten);

        let writes = p.into_chip().into_transport().writes;
        assert_eq!(writes.len(), 17);
        // First word: byte 16 of the zone, i.e. word address 4.
        let frame = &writes[0];
        assert_eq!(frame[2], 0x12);
        assert_eq!(frame[3], 0x00);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 0x04);
        assert_eq!(&frame[6..10], &[0xC8, 0x00, 0x55, 0x00]);
    }

    /// An ack whose CRC trailer was mangled in transit.
    fn corrupted() -> Bytes {
        let mut bad = BytesMut::from(ack().as_ref());
        let last = bad.len() - 1;
        bad[last] ^= 0x40;
        bad.freeze()
    }

    #[test]
    fn write_config_retries_a_corrupted_word_ack() {
        // Word 5's ack arrives mangled once; the word is retransmitted
        // and the run completes.
        let mut responses = vec![ack(); 5];
        responses.push(corrupted());
        responses.extend(vec![ack(); 12]);

        let mut p = provisioner(responses);
        p.write_config().unwrap();
        assert_eq!(p.state(), ProvisionState::ConfigWritten);

        let writes = p.into_chip().into_transport().writes;
        assert_eq!(writes.len(), 18);
        // The retried frame is byte-identical to the failed one.
        assert_eq!(writes[5], writes[6]);
    }

    #[test]
    fn write_data_retries_a_corrupted_slot_ack() {
        let mut responses = vec![response(&serial_block())];
        responses.push(corrupted());
        responses.extend(vec![ack(); 18]);

        let mut p = provisioner(responses);
        p.state = ProvisionState::ConfigLocked;
        p.write_data().unwrap();
        assert_eq!(p.state(), ProvisionState::DataWritten);

        let writes = p.into_chip().into_transport().writes;
        // Serial read, slot 0 twice, slots 1..16, two OTP blocks.
        assert_eq!(writes.len(), 20);
        assert_eq!(writes[1], writes[2]);
    }

    #[test]
    fn lock_config_sends_checksum_of_read_back() {
        let config = ConfigImage::badge(0xC8);
        let zone = written_zone(&config);

        let mut responses = vec![ack(); 17];
        responses.extend(config_reads(&zone));
        responses.push(ack());
        let mut p = provisioner(responses);

        p.write_config().unwrap();
        p.lock_config().unwrap();
        assert_eq!(p.state(), ProvisionState::ConfigLocked);

        let writes = p.into_chip().into_transport().writes;
        let frame = writes.last().unwrap();
        assert_eq!(frame[2], 0x17);
        assert_eq!(frame[3], 0x00);
        assert_eq!(
            u16::from_le_bytes([frame[4], frame[5]]),
            crc16(&zone)
        );
    }

    #[test]
    fn lock_config_aborts_on_divergent_read_back() {
        let config = ConfigImage::badge(0xC8);
        let mut zone = written_zone(&config);
        zone[20] ^= 0x01;

        let mut responses = vec![ack(); 17];
        responses.extend(config_reads(&zone));
        let mut p = provisioner(responses);

        p.write_config().unwrap();
        let err = p.lock_config().unwrap_err();
        assert!(matches!(err, Error::ChecksumPrecondition { offset: 20 }));
        // Still one state back; no Lock frame was sent.
        assert_eq!(p.state(), ProvisionState::ConfigWritten);
        assert_eq!(p.into_chip().into_transport().writes.len(), 17 + 8);
    }

    fn serial_block() -> [u8; 32] {
        let mut block = [0u8; 32];
        block[..4].copy_from_slice(&SERIAL[..4]);
        block[8..13].copy_from_slice(&SERIAL[4..]);
        block
    }

    #[test]
    fn data_phase_writes_slots_and_locks_over_their_image() {
        // Serial read, 16 slot writes, 2 OTP writes, serial read, lock.
        let mut responses = vec![response(&serial_block())];
        responses.extend(vec![ack(); 18]);
        responses.push(response(&serial_block()));
        responses.push(ack());

        let mut p = provisioner(responses);
        p.state = ProvisionState::ConfigLocked;

        p.write_data().unwrap();
        assert_eq!(p.state(), ProvisionState::DataWritten);
        p.lock_data().unwrap();
        assert_eq!(p.state(), ProvisionState::DataLocked);

        let root = [1u8; 32];
        let slot0 = diversified_key(&root, 0, &SERIAL);

        let writes = p.into_chip().into_transport().writes;
        // Slot 0 carries the diversified key, not the root.
        assert_eq!(&writes[1][6..38], &slot0);
        assert_eq!(&writes[2][6..38], &[0x02; 32]);
        // OTP writes address the OTP zone with the block flag.
        assert_eq!(writes[17][3], 0x81);
        assert_eq!(writes[18][3], 0x81);

        // Lock checksum covers slots then OTP, in write order.
        let mut image = Vec::new();
        image.extend_from_slice(&slot0);
        for slot in 1..16u8 {
            image.extend_from_slice(&[slot + 1; 32]);
        }
        image.extend_from_slice(&[0u8; 64]);

        let frame = writes.last().unwrap();
        assert_eq!(frame[2], 0x17);
        assert_eq!(frame[3], 0x01);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), crc16(&image));
    }

    #[test]
    fn verify_reports_every_failing_slot() {
        let mut responses = vec![response(&serial_block())];
        for slot in 0..16u8 {
            let policy = ConfigImage::badge(0xC8).slots[slot as usize];
            if policy.secret {
                // Slot 9 miscompares; everything else checks out.
                responses.push(response(&[u8::from(slot == 9)]));
            } else {
                // Public slots are read back; slot 5 comes back wrong.
                let fill = if slot == 5 { 0xEE } else { slot + 1 };
                responses.push(response(&[fill; 32]));
            }
        }

        let mut p = provisioner(responses);
        p.state = ProvisionState::DataLocked;

        let report = p.verify().unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.failures, vec![5, 9]);
    }

    /// One full `check_config` round against a locked, healthy chip:
    /// config reads, a serial read and one answer per slot.
    fn check_config_round(config: &ConfigImage) -> Vec<Bytes> {
        let mut zone = written_zone(config);
        zone[86] = 0x00;
        zone[87] = 0x00;

        let mut out = config_reads(&zone);
        out.push(response(&serial_block()));
        for slot in 0..16u8 {
            if config.slots[slot as usize].secret {
                out.push(ack());
            } else {
                out.push(response(&[slot + 1; 32]));
            }
        }
        out
    }

    #[test]
    fn check_config_reverifies_keys_and_never_writes() {
        let config = ConfigImage::badge(0xC8);
        let mut responses = check_config_round(&config);
        responses.extend(check_config_round(&config));

        let mut p = provisioner(responses);
        // Re-entrant: two back-to-back runs both pass.
        assert!(p.check_config().unwrap());
        assert!(p.check_config().unwrap());

        // Only Read and CheckMac ever hit the bus; no Write, no Lock.
        let writes = p.into_chip().into_transport().writes;
        assert!(!writes.is_empty());
        for frame in &writes {
            assert!(
                matches!(frame[2], 0x02 | 0x28),
                "unexpected opcode {:#04x}",
                frame[2]
            );
        }
    }

    #[test]
    fn check_config_fails_fast_on_foreign_policy() {
        let config = ConfigImage::badge(0xC8);
        let mut zone = written_zone(&config);
        zone[30] ^= 0x10;
        zone[86] = 0x00;
        zone[87] = 0x00;

        let mut p = provisioner(config_reads(&zone));
        assert!(!p.check_config().unwrap());

        // Policy mismatch short-circuits: no key checks were attempted.
        assert_eq!(p.into_chip().into_transport().writes.len(), 8);
    }

    #[test]
    fn check_config_reports_a_bad_key() {
        let config = ConfigImage::badge(0xC8);
        let mut responses = check_config_round(&config);
        // Slot 1's CheckMac comes back as a miscompare.
        responses[8 + 1 + 1] = response(&[0x01]);

        let mut p = provisioner(responses);
        assert!(!p.check_config().unwrap());
    }

    #[test]
    fn sync_state_reads_lock_bytes() {
        let config = ConfigImage::badge(0xC8);

        // Fully open, image present: resume at the config lock.
        let zone = written_zone(&config);
        let mut responses = vec![response(&serial_block())];
        responses.extend(config_reads(&zone));
        let mut p = provisioner(responses);
        assert_eq!(p.sync_state().unwrap(), ProvisionState::ConfigWritten);

        // Config locked, data open.
        let mut zone = written_zone(&config);
        zone[87] = 0x00;
        let mut responses = vec![response(&serial_block())];
        responses.extend(config_reads(&zone));
        let mut p = provisioner(responses);
        assert_eq!(p.sync_state().unwrap(), ProvisionState::ConfigLocked);

        // Both locked.
        let mut zone = written_zone(&config);
        zone[86] = 0x00;
        zone[87] = 0x00;
        let mut responses = vec![response(&serial_block())];
        responses.extend(config_reads(&zone));
        let mut p = provisioner(responses);
        assert_eq!(p.sync_state().unwrap(), ProvisionState::DataLocked);
    }

    #[test]
    fn otp_id_pads_and_truncates() {
        let [first, second] = otp_from_id("QM-0001");
        assert_eq!(&first[..7], b"QM-0001");
        assert_eq!(&first[7..], &[0u8; 25]);
        assert_eq!(second, [0u8; 32]);

        let [first, _] = otp_from_id("an-identifier-well-beyond-thirty-two-bytes");
        assert_eq!(&first, b"an-identifier-well-beyond-thirty");
    }

    #[test]
    fn sync_state_rejects_foreign_chips() {
        let mut bad = serial_block();
        bad[0] = 0x99;
        let mut p = provisioner(vec![response(&bad)]);
        assert!(matches!(p.sync_state().unwrap_err(), Error::WrongChipFamily));
    }
}
