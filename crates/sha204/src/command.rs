//! Command set definitions: opcodes, zones, mode flags and chip status
//! codes, with their documented bit-level encodings.

use std::fmt;

/// Command opcodes understood by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Pause = 0x01,
    Read = 0x02,
    Mac = 0x08,
    Hmac = 0x11,
    Write = 0x12,
    GenDig = 0x15,
    Nonce = 0x16,
    Lock = 0x17,
    Random = 0x1B,
    DeriveKey = 0x1C,
    UpdateExtra = 0x20,
    CheckMac = 0x28,
    DevRev = 0x30,
    Sha = 0x47,
}

/// The three logical memory regions on the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Zone {
    /// Device address, slot access policy and lock state. 88 bytes.
    Config = 0x00,
    /// Two one-time-programmable 32-byte blocks.
    Otp = 0x01,
    /// Sixteen 32-byte key slots.
    Data = 0x02,
}

/// Transfer size for Read and Write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    /// A 4-byte word.
    Word,
    /// A full 32-byte block.
    Block,
}

impl Size {
    /// Number of data bytes moved.
    pub const fn len(self) -> usize {
        match self {
            Self::Word => 4,
            Self::Block => 32,
        }
    }

    /// The 32-byte flag is additive on top of the zone bits in param1.
    pub(crate) const fn param1_bits(self) -> u8 {
        match self {
            Self::Word => 0x00,
            Self::Block => 0x80,
        }
    }
}

/// Address encoding shared by Read and Write: `(block << 3) + offset`.
pub(crate) const fn zone_address(block: u8, offset: u8) -> u16 {
    ((block as u16) << 3) + offset as u16
}

/// Nonce command modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NonceMode {
    /// Combine the 20-byte input with chip randomness and update the seed.
    Random = 0x00,
    /// As [`Self::Random`] but without updating the stored seed.
    RandomNoSeedUpdate = 0x01,
    /// Use the 32-byte input verbatim as the internal register value.
    Passthrough = 0x03,
}

/// Result of a Nonce command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonceOutput {
    /// Pass-through mode: the chip acknowledged the supplied value.
    Accepted,
    /// Generated modes: the random seed the chip mixed into its register.
    Seed([u8; 32]),
}

impl NonceOutput {
    /// The seed for generated modes, `None` for pass-through.
    pub const fn seed(&self) -> Option<&[u8; 32]> {
        match self {
            Self::Accepted => None,
            Self::Seed(seed) => Some(seed),
        }
    }
}

/// Mac command mode flags (param1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacMode {
    /// Include the full serial number in the message.
    pub include_serial: bool,
    /// Include OTP bytes 0..11 in the message.
    pub include_otp_low: bool,
    /// Include OTP bytes 0..8 in the message.
    pub include_otp_high: bool,
    /// The source flag of the internal register must be "random".
    pub tempkey_source_random: bool,
    /// First 32 bytes of the message come from the internal register
    /// instead of a slot key.
    pub use_tempkey_start: bool,
    /// Second 32 bytes of the message come from the internal register
    /// instead of the challenge.
    pub use_tempkey_end: bool,
}

impl MacMode {
    /// Use the internal register (loaded by a preceding Nonce) as the
    /// challenge half of the message.
    pub const fn tempkey_challenge() -> Self {
        Self {
            use_tempkey_end: true,
            include_serial: false,
            include_otp_low: false,
            include_otp_high: false,
            tempkey_source_random: false,
            use_tempkey_start: false,
        }
    }

    pub(crate) const fn param1(self) -> u8 {
        let mut bits = 0;
        if self.include_serial {
            bits |= 0x40;
        }
        if self.include_otp_low {
            bits |= 0x20;
        }
        if self.include_otp_high {
            bits |= 0x10;
        }
        if self.tempkey_source_random {
            bits |= 0x04;
        }
        if self.use_tempkey_start {
            bits |= 0x02;
        }
        if self.use_tempkey_end {
            bits |= 0x01;
        }
        bits
    }
}

/// CheckMac command mode flags (param1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckMacMode {
    /// Take the challenge from the internal register instead of the
    /// client challenge field.
    pub use_tempkey_challenge: bool,
    /// Take the key from the internal register instead of a slot.
    pub use_tempkey_key: bool,
    /// The source flag of the internal register must be "random".
    pub tempkey_source_random: bool,
    /// Include OTP bytes 0..8 in the message.
    pub include_otp: bool,
}

impl CheckMacMode {
    pub(crate) const fn param1(self) -> u8 {
        let mut bits = 0;
        if self.use_tempkey_challenge {
            bits |= 0x01;
        }
        if self.use_tempkey_key {
            bits |= 0x02;
        }
        if self.tempkey_source_random {
            bits |= 0x04;
        }
        if self.include_otp {
            bits |= 0x20;
        }
        bits
    }
}

/// Which zone a Lock command freezes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockZone {
    /// The configuration zone.
    Config,
    /// The data and OTP zones together.
    Data,
}

impl LockZone {
    pub(crate) const fn param1(self, skip_crc: bool) -> u8 {
        let mut bits = match self {
            Self::Config => 0x00,
            Self::Data => 0x01,
        };
        if skip_crc {
            bits |= 0x80;
        }
        bits
    }
}

/// Status codes the chip returns in a 4-byte response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipStatus {
    /// Command executed successfully.
    Success,
    /// CheckMac miscompare: the presented MAC did not verify.
    CheckMacMiscompare,
    /// Command was received but cannot be parsed.
    ParseError,
    /// Command could not be executed: bad parameters, policy
    /// violation, or the zone is in the wrong lock state.
    ExecutionError,
    /// The chip woke up and is ready.
    WakeToken,
    /// The chip saw a CRC or communication error on the command.
    CommsError,
    /// A code not listed in the datasheet.
    Unknown(u8),
}

impl ChipStatus {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            0x01 => Self::CheckMacMiscompare,
            0x03 => Self::ParseError,
            0x0F => Self::ExecutionError,
            0x11 => Self::WakeToken,
            0xFF => Self::CommsError,
            other => Self::Unknown(other),
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::CheckMacMiscompare => 0x01,
            Self::ParseError => 0x03,
            Self::ExecutionError => 0x0F,
            Self::WakeToken => 0x11,
            Self::CommsError => 0xFF,
            Self::Unknown(code) => code,
        }
    }

    /// A comms error means the frame arrived corrupted; resending the
    /// same command may succeed. Every other non-success code is a
    /// deterministic rejection and must not be retried.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::CommsError)
    }
}

impl fmt::Display for ChipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::CheckMacMiscompare => write!(f, "CheckMac miscompare"),
            Self::ParseError => write!(f, "command parse error"),
            Self::ExecutionError => write!(f, "execution error"),
            Self::WakeToken => write!(f, "wake token"),
            Self::CommsError => write!(f, "communication error"),
            Self::Unknown(code) => write!(f, "unknown status {code:#04x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_address_uses_corrected_precedence() {
        // (block << 3) + offset, not block << (3 + offset).
        assert_eq!(zone_address(2, 5), 0x15);
        assert_eq!(zone_address(0, 3), 0x03);
        assert_eq!(zone_address(15, 0), 0x78);
    }

    #[test]
    fn mac_mode_bits() {
        assert_eq!(MacMode::default().param1(), 0x00);
        assert_eq!(MacMode::tempkey_challenge().param1(), 0x01);
        let all = MacMode {
            include_serial: true,
            include_otp_low: true,
            include_otp_high: true,
            tempkey_source_random: true,
            use_tempkey_start: true,
            use_tempkey_end: true,
        };
        assert_eq!(all.param1(), 0x77);
    }

    #[test]
    fn lock_param_bits() {
        assert_eq!(LockZone::Config.param1(false), 0x00);
        assert_eq!(LockZone::Data.param1(false), 0x01);
        assert_eq!(LockZone::Data.param1(true), 0x81);
    }

    #[test]
    fn status_round_trip() {
        for code in [0x00, 0x01, 0x03, 0x0F, 0x11, 0xFF, 0x42] {
            assert_eq!(ChipStatus::from_code(code).code(), code);
        }
        assert!(ChipStatus::CommsError.is_transient());
        assert!(!ChipStatus::ExecutionError.is_transient());
    }
}
