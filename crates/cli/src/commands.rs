//! Implementations of the CLI subcommands.

use std::path::Path;

use anyhow::{anyhow, bail, ensure, Result};

use hexmark_badge::crypto::{diversified_key, format_challenge_input};
use hexmark_badge::provision::{otp_from_id, Provisioner};
use hexmark_badge::registry::{FileRegistry, Registrar};
use hexmark_badge::{board::BoardControl, eeprom, session, validator};
use hexmark_badge::{Block, ConfigImage, KeyStore, Serial};
use hexmark_sha204::ChipClient;
use hexmark_transport_i2c::{
    BoardPins, CdevBoard, I2cEeprom, LinuxI2cTransport, CHIP_ADDRESS, EEPROM_ADDRESS,
};

/// Default jig wiring: three consecutive lines on one GPIO chip.
const JIG_PINS: BoardPins = BoardPins {
    led: 4,
    write_protect: 5,
    detect: 6,
};

/// Board serial numbers accept decimal or 0x-prefixed hex.
pub(crate) fn parse_board_serial(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid board serial {s:?}"))
}

fn decode_fixed<const N: usize>(what: &str, s: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out)
        .map_err(|_| anyhow!("{what} must be {N} hex-encoded bytes"))?;
    Ok(out)
}

fn open_chip(bus: &str) -> Result<ChipClient<LinuxI2cTransport>> {
    let transport = LinuxI2cTransport::open(bus, CHIP_ADDRESS)?;
    let mut chip = ChipClient::new(transport);
    chip.wake()?;
    Ok(chip)
}

fn open_board(device: &str) -> Result<CdevBoard> {
    Ok(CdevBoard::open(device, JIG_PINS)?)
}

pub(crate) fn provision(
    bus: &str,
    secrets: &Path,
    id: u16,
    registry: &Path,
    gpio: Option<&str>,
) -> Result<()> {
    let keys = KeyStore::load(secrets)?;
    let mut board = gpio.map(open_board).transpose()?;

    if let Some(board) = board.as_mut() {
        println!("waiting for a board in the jig...");
        board.wait_for_insert()?;
    }

    let chip = open_chip(bus)?;
    let config = ConfigImage::badge((CHIP_ADDRESS << 1) as u8);
    let mut provisioner =
        Provisioner::new(chip, config, keys).with_otp(otp_from_id(&format!("{id:04X}")));

    let report = provisioner.run()?;
    ensure!(report.is_ok(), "{report}");

    let mut chip = provisioner.into_chip();
    let chip_serial = chip.serial_number()?;

    // Identity header, with write protect released only around the write.
    let mut identity = I2cEeprom::open(bus, EEPROM_ADDRESS)?;
    if let Some(board) = board.as_mut() {
        board.set_eeprom_write_protect(false)?;
    }
    let header_result = eeprom::self_test(&mut identity, id);
    if let Some(board) = board.as_mut() {
        board.set_eeprom_write_protect(true)?;
    }
    header_result?;

    FileRegistry::new(registry).record(id, &chip_serial);
    println!(
        "provisioned board {id:04x} with chip {}",
        hex::encode(chip_serial)
    );

    if let Some(board) = board.as_mut() {
        board.set_status_led(true)?;
        board.wait_for_removal()?;
        board.set_status_led(false)?;
    }
    Ok(())
}

pub(crate) fn challenge(bus: &str, slot: u8, id: Option<&str>) -> Result<()> {
    let mut chip = open_chip(bus)?;
    let serial = chip.serial_number()?;

    let input: [u8; 20] = match id {
        Some(id) => format_challenge_input(id),
        None => rand::random(),
    };
    let (seed, response) = session::perform_challenge(&mut chip, slot, &input)?;

    println!("serial:   {}", hex::encode(serial));
    println!("input:    {}", hex::encode(input));
    println!("random:   {}", hex::encode(seed));
    println!("response: {}", hex::encode(response));
    Ok(())
}

pub(crate) fn check_key(bus: &str, secrets: &Path, slot: u8) -> Result<()> {
    let keys = KeyStore::load(secrets)?;
    let mut chip = open_chip(bus)?;

    let expected = if slot == 0 {
        let serial = chip.serial_number()?;
        diversified_key(keys.root_key()?, 0, &serial)
    } else {
        *keys.key(slot)?
    };

    session::check_key(&mut chip, slot, &expected)?;
    println!("slot {slot:#04x} key verified");
    Ok(())
}

pub(crate) fn check_config(bus: &str, secrets: &Path) -> Result<()> {
    let keys = KeyStore::load(secrets)?;
    let chip = open_chip(bus)?;
    let config = ConfigImage::badge((CHIP_ADDRESS << 1) as u8);

    let mut provisioner = Provisioner::new(chip, config, keys);
    ensure!(
        provisioner.check_config()?,
        "chip does not carry the intended policy and key material"
    );
    println!("config zone and key material verified");
    Ok(())
}

pub(crate) fn self_test(bus: &str, id: u16, gpio: Option<&str>) -> Result<()> {
    let mut board = gpio.map(open_board).transpose()?;
    let mut identity = I2cEeprom::open(bus, EEPROM_ADDRESS)?;

    if let Some(board) = board.as_mut() {
        board.set_eeprom_write_protect(false)?;
    }
    let result = eeprom::self_test(&mut identity, id);
    if let Some(board) = board.as_mut() {
        board.set_eeprom_write_protect(true)?;
    }
    result?;

    println!("eeprom identity header verified for board {id:04x}");
    Ok(())
}

pub(crate) fn validate(
    secrets: &Path,
    serial: &str,
    random: &str,
    response: &str,
    id: &str,
    slot: u8,
) -> Result<()> {
    let keys = KeyStore::load(secrets)?;
    let serial: Serial = decode_fixed("serial", serial)?;
    let random: Block = decode_fixed("random", random)?;
    let response: Block = decode_fixed("response", response)?;
    let input = format_challenge_input(id);

    if validator::validate(&serial, &random, &input, keys.root_key()?, slot, &response) {
        println!("response valid");
        Ok(())
    } else {
        bail!("response does not match the expected value")
    }
}
