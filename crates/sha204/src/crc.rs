//! The chip's 16-bit CRC.
//!
//! Polynomial 0x8005, initial value 0x0000, input bytes bit-reflected,
//! output not reflected, no final XOR. The same routine validates
//! inbound responses and produces the checksums the Lock command
//! requires, so any deviation here breaks every downstream operation.

/// Compute the chip CRC over `data`.
///
/// Callers pass the exact subrange the chip covers: for outbound
/// frames everything after the command-flag byte, for responses
/// everything up to (excluding) the trailing CRC bytes.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        // Reflect the input byte: swap bit pairs, nibble pairs, halves.
        let mut d = byte;
        d = ((d & 0x55) << 1) | ((d & 0xAA) >> 1);
        d = ((d & 0x33) << 2) | ((d & 0xCC) >> 2);
        d = ((d & 0x0F) << 4) | ((d & 0xF0) >> 4);

        crc ^= (d as u16) << 8;
        for _ in 0..8 {
            let carry = crc & 0x8000 != 0;
            crc <<= 1;
            if carry {
                crc ^= 0x8005;
            }
        }
    }
    crc
}
