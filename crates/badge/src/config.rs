//! Configuration-zone image: slot access policy and device settings.
//!
//! The policy is baked into the config zone at provisioning time and
//! becomes immutable at the config lock. The table is passed into the
//! provisioning state machine explicitly; nothing here contains key
//! material.

use crate::error::{Error, Result};
use crate::SLOT_COUNT;
use hexmark_sha204::CONFIG_ZONE_LEN;

/// First writable config byte. Bytes 0..16 (serial number, revision)
/// are device-fixed.
const WRITABLE_START: usize = 16;
/// End of the writable region. Bytes 84..88 (user extra, selector,
/// lock state) are owned by the chip.
const WRITABLE_END: usize = 84;

/// Byte offset of the slot-config table within the zone.
const SLOT_CONFIG_START: usize = 20;

/// Access policy for one data-zone slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    /// Blocks plaintext reads of the slot.
    pub secret: bool,
    /// Slot whose key authorizes an encrypted write to this slot.
    pub write_key: u8,
    /// Slot whose key authorizes an encrypted read; `None` leaves the
    /// slot cleartext-readable (if not secret) or unreadable.
    pub read_key: Option<u8>,
    /// The slot may only verify a presented MAC: never read, never
    /// used as a Mac/GenDig source.
    pub check_only: bool,
}

impl SlotPolicy {
    /// A secret key slot writable under `write_key`, not readable at all.
    pub const fn secret_key(write_key: u8) -> Self {
        Self {
            secret: true,
            write_key,
            read_key: None,
            check_only: false,
        }
    }

    /// A cleartext-readable value slot writable under `write_key`.
    pub const fn public_value(write_key: u8) -> Self {
        Self {
            secret: false,
            write_key,
            read_key: None,
            check_only: false,
        }
    }

    /// A secret slot readable only encrypted under `read_key`.
    pub const fn encrypted_value(write_key: u8, read_key: u8) -> Self {
        Self {
            secret: true,
            write_key,
            read_key: Some(read_key),
            check_only: false,
        }
    }

    /// A transport/authorization key: usable by CheckMac only.
    pub const fn check_only_key(write_key: u8) -> Self {
        Self {
            secret: true,
            write_key,
            read_key: None,
            check_only: true,
        }
    }

    /// Encode into the two SlotConfig bytes (low byte first).
    ///
    /// Low byte: ReadKey bits 0..3, CheckOnly bit 4, EncryptRead bit 6,
    /// IsSecret bit 7. High byte: WriteKey bits 0..3, WriteConfig
    /// nibble 0x4 (writes require the authorizing MAC).
    pub const fn encode(self) -> [u8; 2] {
        let mut low = match self.read_key {
            Some(key) => key & 0x0F | 0x40,
            None => 0x00,
        };
        if self.check_only {
            low |= 0x10;
        }
        if self.secret {
            low |= 0x80;
        }
        let high = (self.write_key & 0x0F) | 0x40;
        [low, high]
    }
}

/// The intended 88-byte configuration image.
#[derive(Debug, Clone)]
pub struct ConfigImage {
    /// Bus address the chip answers on after the config lock.
    pub i2c_address: u8,
    /// OTP zone consumption mode after the data lock.
    pub otp_mode: u8,
    /// Per-slot access policy.
    pub slots: [SlotPolicy; SLOT_COUNT],
}

impl ConfigImage {
    /// The badge policy: slot 0 holds the diversified device key,
    /// slots 4..8 are public values, the even slots 8..14 are
    /// encrypted-readable under the following odd slot, and slots
    /// 14/15 are the factory write keys, check-only.
    pub const fn badge(i2c_address: u8) -> Self {
        let slots = [
            SlotPolicy::secret_key(0x0F),          // 0: diversified device key
            SlotPolicy::secret_key(0x0F),          // 1
            SlotPolicy::secret_key(0x0E),          // 2
            SlotPolicy::secret_key(0x0E),          // 3
            SlotPolicy::public_value(0x0E),        // 4
            SlotPolicy::public_value(0x0E),        // 5
            SlotPolicy::public_value(0x0E),        // 6
            SlotPolicy::public_value(0x0E),        // 7
            SlotPolicy::encrypted_value(0x0F, 9),  // 8
            SlotPolicy::secret_key(0x0F),          // 9: read key for 8
            SlotPolicy::encrypted_value(0x0E, 11), // 10
            SlotPolicy::secret_key(0x0E),          // 11: read key for 10
            SlotPolicy::encrypted_value(0x0E, 13), // 12
            SlotPolicy::secret_key(0x0E),          // 13: read key for 12
            SlotPolicy::check_only_key(0x0F),      // 14: sub-master write key
            SlotPolicy::check_only_key(0x0F),      // 15: master write key
        ];
        Self {
            i2c_address,
            otp_mode: 0x55,
            slots,
        }
    }

    /// Render the full 88-byte image. Device-fixed bytes (0..16 and
    /// 84..88) are left zero; [`Self::expected_image`] splices them in
    /// from a read-back before any checksum is computed.
    pub fn render(&self) -> [u8; CONFIG_ZONE_LEN] {
        let mut image = [0u8; CONFIG_ZONE_LEN];
        image[16] = self.i2c_address;
        image[17] = 0x00;
        image[18] = self.otp_mode;
        image[19] = 0x00;

        for (slot, policy) in self.slots.iter().enumerate() {
            let bytes = policy.encode();
            image[SLOT_CONFIG_START + slot * 2] = bytes[0];
            image[SLOT_CONFIG_START + slot * 2 + 1] = bytes[1];
        }

        // UseFlag/UpdateCount pairs for slots 0..8, then LastKeyUse.
        for slot in 0..8 {
            image[52 + slot * 2] = 0xFF;
            image[52 + slot * 2 + 1] = 0x00;
        }
        for byte in &mut image[68..84] {
            *byte = 0xFF;
        }
        image
    }

    /// The words of the writable region as (block, offset, word)
    /// triples; config-zone writes are 4 bytes at a time.
    pub fn write_words(&self) -> Vec<(u8, u8, [u8; 4])> {
        let image = self.render();
        (WRITABLE_START..WRITABLE_END)
            .step_by(4)
            .map(|byte| {
                let word_index = byte / 4;
                let block = (word_index / 8) as u8;
                let offset = (word_index % 8) as u8;
                let mut word = [0u8; 4];
                word.copy_from_slice(&image[byte..byte + 4]);
                (block, offset, word)
            })
            .collect()
    }

    /// Splice this image's writable region into a read-back of the
    /// zone, producing the exact final image the lock checksum must
    /// cover. Fails if the read-back's writable bytes do not already
    /// match: locking over a different image is never attempted.
    pub fn expected_image(&self, read_back: &[u8; CONFIG_ZONE_LEN]) -> Result<[u8; CONFIG_ZONE_LEN]> {
        let rendered = self.render();
        if let Some(offset) = (WRITABLE_START..WRITABLE_END)
            .find(|&i| read_back[i] != rendered[i])
        {
            return Err(Error::ChecksumPrecondition { offset });
        }

        let mut image = *read_back;
        image[WRITABLE_START..WRITABLE_END]
            .copy_from_slice(&rendered[WRITABLE_START..WRITABLE_END]);
        Ok(image)
    }

    /// Whether a read-back config zone carries this slot policy table.
    pub fn policy_matches(&self, read_back: &[u8; CONFIG_ZONE_LEN]) -> bool {
        let rendered = self.render();
        read_back[SLOT_CONFIG_START..52] == rendered[SLOT_CONFIG_START..52]
    }
}
