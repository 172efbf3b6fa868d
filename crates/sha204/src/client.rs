//! Command transport codec.
//!
//! Frames a command, appends the CRC, writes it to the transport and
//! poll-reads the response. The client owns the transport: the chip's
//! internal register state (nonce, tempkey) is global to the device,
//! so exactly one caller may run a command sequence at a time, and
//! exclusive ownership of the `ChipClient` is how that is enforced.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::command::{ChipStatus, Opcode};
use crate::crc::crc16;
use crate::error::{Error, Result};
use crate::transport::{ChipTransport, TransportError};

/// Leading flag byte marking a command frame on the bus.
const COMMAND_FLAG: u8 = 0x03;
/// Fixed frame overhead included in the count byte: count, opcode,
/// param1, two param2 bytes and the two CRC bytes.
const FRAME_OVERHEAD: u8 = 0x07;
/// Count byte value the chip uses to signal "nothing to send".
const NO_DATA: u8 = 0xFF;

/// Default number of poll reads before giving up on a response.
pub const DEFAULT_POLL_ATTEMPTS: usize = 10;
/// Default delay between poll reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Client for one chip on one bus.
#[derive(Debug)]
pub struct ChipClient<T: ChipTransport> {
    transport: T,
    poll_attempts: usize,
    poll_interval: Duration,
}

impl<T: ChipTransport> ChipClient<T> {
    /// Create a client with the default poll budget.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the response poll budget.
    pub const fn with_polling(mut self, attempts: usize, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    /// Consume the client and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send a wake pulse. The chip treats a zero byte at any address
    /// as the wake token; a NACK here is normal because nothing
    /// acknowledges the dummy address.
    pub fn wake(&mut self) -> Result<()> {
        match self.transport.write(&[0x00]) {
            Ok(()) | Err(TransportError::Nack) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Frame and send a command, then poll for and validate the response.
    ///
    /// Returns the data bytes of the response (everything between the
    /// count byte and the CRC trailer). A 4-byte envelope with a
    /// non-zero status byte becomes [`Error::Chip`]; the caller decides
    /// whether that is a failure or, for CheckMac, an expected outcome.
    pub fn send_command(
        &mut self,
        opcode: Opcode,
        param1: u8,
        param2: u16,
        data: &[u8],
        response_len: usize,
    ) -> Result<Bytes> {
        let frame = build_frame(opcode, param1, param2, data);
        trace!(opcode = ?opcode, frame = %hex::encode(&frame), "sending command");
        self.transport.write(&frame)?;

        let response = self.poll_response(response_len)?;
        parse_response(&response)
    }

    /// Poll-read the response. Each attempt is a fresh read, not a
    /// retransmit; the chip NACKs until it has finished executing.
    fn poll_response(&mut self, response_len: usize) -> Result<Bytes> {
        for attempt in 0..self.poll_attempts {
            std::thread::sleep(self.poll_interval);
            match self.transport.read(response_len) {
                Ok(response) => return Ok(response),
                Err(TransportError::Nack) => {
                    trace!(attempt, "chip busy, polling again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(attempts = self.poll_attempts, "chip never answered");
        Err(Error::NoResponse {
            attempts: self.poll_attempts,
        })
    }
}

/// Build the wire frame:
/// `[0x03, 0x07 + len, opcode, param1, param2_lsb, param2_msb] ++ data ++ crc_le`.
/// The CRC covers everything after the leading flag byte.
fn build_frame(opcode: Opcode, param1: u8, param2: u16, data: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(8 + data.len());
    frame.put_u8(COMMAND_FLAG);
    frame.put_u8(FRAME_OVERHEAD + data.len() as u8);
    frame.put_u8(opcode as u8);
    frame.put_u8(param1);
    frame.put_u16_le(param2);
    frame.put_slice(data);

    let crc = crc16(&frame[1..]);
    frame.put_u16_le(crc);
    frame.freeze()
}

/// Validate the response envelope and slice out its data bytes.
fn parse_response(response: &Bytes) -> Result<Bytes> {
    if response.is_empty() {
        return Err(Error::InvalidResponse("empty read"));
    }
    if response[0] == NO_DATA {
        return Err(Error::NoData);
    }

    let count = response[0] as usize;
    if count < 4 || count > response.len() {
        return Err(Error::InvalidResponse("count byte out of range"));
    }

    let computed = crc16(&response[..count - 2]);
    let received = u16::from_le_bytes([response[count - 2], response[count - 1]]);
    if computed != received {
        return Err(Error::CrcMismatch { computed, received });
    }

    if count == 4 && response[1] != 0x00 {
        return Err(Error::Chip(ChipStatus::from_code(response[1])));
    }

    Ok(response.slice(1..count - 2))
}
