//! Chip transport over a Linux I2C character device.

use std::fmt;

use bytes::Bytes;
use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};

use hexmark_sha204::{ChipTransport, TransportError};

/// [`ChipTransport`] backed by `/dev/i2c-*`.
pub struct LinuxI2cTransport {
    device: LinuxI2CDevice,
    path: String,
    address: u16,
}

impl LinuxI2cTransport {
    /// Open a bus device and bind it to a 7-bit peripheral address.
    pub fn open(path: &str, address: u16) -> Result<Self, TransportError> {
        let device =
            LinuxI2CDevice::new(path, address).map_err(|_| TransportError::Connection)?;
        Ok(Self {
            device,
            path: path.to_string(),
            address,
        })
    }
}

/// The kernel reports a peripheral NACK as ENXIO or EREMOTEIO
/// depending on the bus driver.
fn map_error(error: LinuxI2CError) -> TransportError {
    let io: std::io::Error = error.into();
    match io.raw_os_error() {
        Some(6 | 121) => TransportError::Nack,
        _ => TransportError::other(io.to_string()),
    }
}

impl fmt::Debug for LinuxI2cTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinuxI2cTransport")
            .field("path", &self.path)
            .field("address", &format_args!("{:#04x}", self.address))
            .finish()
    }
}

impl ChipTransport for LinuxI2cTransport {
    fn do_write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.device.write(bytes).map_err(map_error)
    }

    fn do_read(&mut self, len: usize) -> Result<Bytes, TransportError> {
        let mut buffer = vec![0u8; len];
        self.device.read(&mut buffer).map_err(map_error)?;
        Ok(Bytes::from(buffer))
    }
}
