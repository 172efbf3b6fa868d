//! Identity header stored in the board EEPROM.
//!
//! The badge firmware identifies a provisioned board by a 32-byte
//! header at address 0: magic, header version, filesystem geometry,
//! USB IDs, board serial and an XOR checksum. Layout is fixed;
//! firmware in the field parses it byte-for-byte.

use tracing::debug;

use crate::board::Eeprom;
use crate::error::{Error, Result};

/// Total header length at EEPROM address 0.
pub const HEADER_LEN: usize = 32;

const MAGIC: &[u8; 4] = b"THEX";
const VERSION: &[u8; 4] = b"2024";

/// Filesystem region geometry, little-endian in the header.
const FS_OFFSET: u16 = 32;
const FS_PAGE_SIZE: u16 = 32;
const FS_TOTAL: u32 = 8 * 1024;

const VENDOR_ID: u16 = 0xF055;
const PRODUCT_ID: u16 = 0x4247;
const TRAILER: &[u8; 9] = b"GCHQ.NET\0";

/// XOR checksum over header bytes 1..31, seeded so an all-zero
/// header does not validate.
const CHECKSUM_SEED: u8 = 0x55;

fn checksum(header: &[u8]) -> u8 {
    header[1..HEADER_LEN - 1]
        .iter()
        .fold(CHECKSUM_SEED, |acc, &b| acc ^ b)
}

/// Render the identity header for a board serial number.
pub fn header(serial: u16) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[0..4].copy_from_slice(MAGIC);
    out[4..8].copy_from_slice(VERSION);
    out[8..10].copy_from_slice(&FS_OFFSET.to_le_bytes());
    out[10..12].copy_from_slice(&FS_PAGE_SIZE.to_le_bytes());
    out[12..16].copy_from_slice(&FS_TOTAL.to_le_bytes());
    out[16..18].copy_from_slice(&VENDOR_ID.to_le_bytes());
    out[18..20].copy_from_slice(&PRODUCT_ID.to_le_bytes());
    out[20..22].copy_from_slice(&serial.to_le_bytes());
    out[22..31].copy_from_slice(TRAILER);
    out[31] = checksum(&out);
    out
}

/// Validate a header image and extract the board serial.
pub fn parse_header(data: &[u8; HEADER_LEN]) -> Result<u16> {
    if &data[0..4] != MAGIC {
        return Err(Error::BadHeader("bad magic"));
    }
    if &data[4..8] != VERSION {
        return Err(Error::BadHeader("unsupported header version"));
    }
    if data[31] != checksum(data) {
        return Err(Error::BadHeader("checksum mismatch"));
    }
    Ok(u16::from_le_bytes([data[20], data[21]]))
}

/// Write the identity header to address 0. The caller is responsible
/// for releasing the write-protect line around this.
pub fn write_identity<E: Eeprom>(eeprom: &mut E, serial: u16) -> Result<()> {
    debug!(serial = format_args!("{serial:#06x}"), "writing identity header");
    eeprom.write(0, &header(serial))?;
    Ok(())
}

/// Read back and validate the header, returning the board serial.
pub fn read_identity<E: Eeprom>(eeprom: &mut E) -> Result<u16> {
    let data = eeprom.read(0, HEADER_LEN)?;
    let data: [u8; HEADER_LEN] = data
        .as_slice()
        .try_into()
        .map_err(|_| Error::BadHeader("short read"))?;
    parse_header(&data)
}

/// Write the header and prove the EEPROM retains it: a read-back must
/// match byte-for-byte and validate.
pub fn self_test<E: Eeprom>(eeprom: &mut E, serial: u16) -> Result<()> {
    write_identity(eeprom, serial)?;
    let read_back = read_identity(eeprom)?;
    if read_back != serial {
        return Err(Error::BadHeader("read-back serial mismatch"));
    }
    Ok(())
}
