//! Byte transport abstraction for the chip.
//!
//! A transport moves raw bytes to and from one physical chip on one
//! bus. It has no knowledge of framing, CRCs or command semantics;
//! those live in [`crate::client`].

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

/// Trait for byte transports carrying chip traffic.
///
/// The chip NACKs reads while it is executing a command, so `read`
/// failing with [`TransportError::Nack`] is an expected, retryable
/// condition rather than a fault.
pub trait ChipTransport: Send + fmt::Debug {
    /// Send raw bytes to the chip.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        trace!(bytes = %hex::encode(bytes), "transport write");
        let result = self.do_write(bytes);
        if let Err(e) = &result {
            debug!(error = ?e, "transport write failed");
        }
        result
    }

    /// Read up to `len` raw bytes from the chip.
    fn read(&mut self, len: usize) -> Result<Bytes, TransportError> {
        let result = self.do_read(len);
        match &result {
            Ok(bytes) => trace!(bytes = %hex::encode(bytes), "transport read"),
            Err(e) => debug!(error = ?e, "transport read failed"),
        }
        result
    }

    /// Internal implementation of `write`; concrete transports override this.
    fn do_write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Internal implementation of `read`; concrete transports override this.
    fn do_read(&mut self, len: usize) -> Result<Bytes, TransportError>;
}

impl<T: ChipTransport + ?Sized> ChipTransport for &mut T {
    fn do_write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).do_write(bytes)
    }

    fn do_read(&mut self, len: usize) -> Result<Bytes, TransportError> {
        (**self).do_read(len)
    }
}
