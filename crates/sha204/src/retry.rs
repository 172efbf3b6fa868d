//! Bounded retry for transient transport symptoms.
//!
//! There is exactly one retry policy in this crate: retry what
//! [`Error::is_retryable`] allows, up to a fixed attempt count, and
//! surface everything else immediately. Chip rejections never loop.

use tracing::debug;

use crate::error::{Error, Result};

/// Run `op` up to `attempts` times, stopping early on success or on a
/// non-retryable error. Exceeding the bound returns the last transient
/// error observed.
pub fn with_retry<T, F>(attempts: usize, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last = None;
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                debug!(attempt, attempts, error = %e, "transient failure, retrying");
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or(Error::NoResponse { attempts }))
}
