//! Registration sink for provisioned boards.
//!
//! Registration is bookkeeping, not part of the trust chain: a failed
//! record is logged and never fails the provisioning run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::Serial;

/// Receives one record per successfully provisioned board.
pub trait Registrar {
    /// Fire-and-forget: implementations log failures themselves.
    fn record(&mut self, board_serial: u16, chip_serial: &Serial);
}

/// Appends one CSV line per board: `<board_hex>,<chip_hex>,<unix_ts>`.
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, board_serial: u16, chip_serial: &Serial) -> std::io::Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{:04x},{},{timestamp}",
            board_serial,
            hex::encode(chip_serial)
        )
    }
}

impl Registrar for FileRegistry {
    fn record(&mut self, board_serial: u16, chip_serial: &Serial) {
        match self.append(board_serial, chip_serial) {
            Ok(()) => info!(
                board = format_args!("{board_serial:#06x}"),
                chip = %hex::encode(chip_serial),
                "board registered"
            ),
            Err(e) => warn!(
                board = format_args!("{board_serial:#06x}"),
                error = %e,
                "failed to record registration"
            ),
        }
    }
}
