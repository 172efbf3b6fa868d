//! Scripted in-memory transport for tests.

use bytes::Bytes;

use super::{ChipTransport, TransportError};

/// A transport that replays a queue of scripted responses and records
/// every write, optionally NACKing a number of reads first to exercise
/// the poll loop.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Responses to return, in order. Each `read` pops the front.
    pub responses: Vec<Bytes>,
    /// Frames that were written, in order.
    pub writes: Vec<Bytes>,
    /// Number of reads to NACK before serving the next response.
    pub nacks_before_read: usize,
}

impl MockTransport {
    /// Create a mock transport that serves the given responses in order.
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses,
            ..Self::default()
        }
    }

    /// Create a mock transport whose reads always NACK.
    pub fn always_busy() -> Self {
        Self {
            nacks_before_read: usize::MAX,
            ..Self::default()
        }
    }

    /// NACK the next `count` reads before serving responses.
    pub fn with_nacks(mut self, count: usize) -> Self {
        self.nacks_before_read = count;
        self
    }
}

impl ChipTransport for MockTransport {
    fn do_write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writes.push(Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn do_read(&mut self, _len: usize) -> Result<Bytes, TransportError> {
        if self.nacks_before_read > 0 {
            self.nacks_before_read = self.nacks_before_read.saturating_sub(1);
            return Err(TransportError::Nack);
        }
        if self.responses.is_empty() {
            return Err(TransportError::Nack);
        }
        Ok(self.responses.remove(0))
    }
}
