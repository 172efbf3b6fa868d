//! Jig pin control over the GPIO character device.

use std::thread;
use std::time::Duration;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use tracing::debug;

use hexmark_badge::board::{BoardControl, BoardError};

/// Line offsets for the three jig signals on one GPIO chip.
#[derive(Debug, Clone, Copy)]
pub struct BoardPins {
    /// Status LED, active low.
    pub led: u32,
    /// Board-seated detect input, high when a board is present.
    pub detect: u32,
    /// EEPROM write-protect, high when protected.
    pub write_protect: u32,
}

/// [`BoardControl`] over `/dev/gpiochip*`.
pub struct CdevBoard {
    led: LineHandle,
    detect: LineHandle,
    write_protect: LineHandle,
    poll_interval: Duration,
}

fn gpio_error(error: gpio_cdev::Error) -> BoardError {
    BoardError::Other(error.to_string())
}

impl CdevBoard {
    /// Claim the three jig lines. The LED starts off and the EEPROM
    /// starts protected.
    pub fn open(device: &str, pins: BoardPins) -> Result<Self, BoardError> {
        let mut chip = Chip::new(device).map_err(gpio_error)?;

        let led = chip
            .get_line(pins.led)
            .and_then(|l| l.request(LineRequestFlags::OUTPUT, 1, "hexmark-led"))
            .map_err(gpio_error)?;
        let detect = chip
            .get_line(pins.detect)
            .and_then(|l| l.request(LineRequestFlags::INPUT, 0, "hexmark-detect"))
            .map_err(gpio_error)?;
        let write_protect = chip
            .get_line(pins.write_protect)
            .and_then(|l| l.request(LineRequestFlags::OUTPUT, 1, "hexmark-wp"))
            .map_err(gpio_error)?;

        Ok(Self {
            led,
            detect,
            write_protect,
            poll_interval: Duration::from_millis(50),
        })
    }

    fn wait_for_detect(&self, level: u8) -> Result<(), BoardError> {
        loop {
            if self.detect.get_value().map_err(gpio_error)? == level {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl BoardControl for CdevBoard {
    fn set_status_led(&mut self, on: bool) -> Result<(), BoardError> {
        // Active low.
        self.led.set_value(u8::from(!on)).map_err(gpio_error)
    }

    fn set_eeprom_write_protect(&mut self, protected: bool) -> Result<(), BoardError> {
        debug!(protected, "eeprom write protect");
        self.write_protect
            .set_value(u8::from(protected))
            .map_err(gpio_error)
    }

    fn wait_for_insert(&mut self) -> Result<(), BoardError> {
        self.wait_for_detect(1)
    }

    fn wait_for_removal(&mut self) -> Result<(), BoardError> {
        self.wait_for_detect(0)
    }
}
