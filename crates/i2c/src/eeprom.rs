//! Identity EEPROM over I2C (64-kbit parts with 16-bit addressing).

use std::thread;
use std::time::Duration;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use hexmark_badge::board::{BoardError, Eeprom};

/// Write page size of the part; a single write transaction must not
/// cross a page boundary.
const PAGE_SIZE: usize = 32;

/// Internal write-cycle time after each page write.
const WRITE_CYCLE: Duration = Duration::from_millis(5);

/// [`Eeprom`] backed by a Linux I2C device. Addresses are sent as two
/// big-endian bytes ahead of the data.
pub struct I2cEeprom {
    device: LinuxI2CDevice,
}

impl I2cEeprom {
    pub fn open(path: &str, address: u16) -> Result<Self, BoardError> {
        let device = LinuxI2CDevice::new(path, address)
            .map_err(|e| BoardError::Other(e.to_string()))?;
        Ok(Self { device })
    }

    fn bus_error(error: i2cdev::linux::LinuxI2CError) -> BoardError {
        let io: std::io::Error = error.into();
        BoardError::Io(io)
    }
}

impl Eeprom for I2cEeprom {
    fn read(&mut self, address: u16, len: usize) -> Result<Vec<u8>, BoardError> {
        self.device
            .write(&address.to_be_bytes())
            .map_err(Self::bus_error)?;
        let mut buffer = vec![0u8; len];
        self.device.read(&mut buffer).map_err(Self::bus_error)?;
        Ok(buffer)
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BoardError> {
        let mut address = address as usize;
        let mut remaining = data;

        while !remaining.is_empty() {
            let room = PAGE_SIZE - address % PAGE_SIZE;
            let (chunk, rest) = remaining.split_at(remaining.len().min(room));

            let mut frame = Vec::with_capacity(2 + chunk.len());
            frame.extend_from_slice(&(address as u16).to_be_bytes());
            frame.extend_from_slice(chunk);
            self.device.write(&frame).map_err(Self::bus_error)?;
            thread::sleep(WRITE_CYCLE);

            address += chunk.len();
            remaining = rest;
        }
        Ok(())
    }
}
