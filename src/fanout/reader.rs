//! Per-consumer cursor into the shared fanout buffer.

use super::Shared;
use crate::error::{FanoutError, Result};
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::debug;

/// One consumer's view of the shared stream.
///
/// Reads block until the producer has supplied data at this handle's
/// position. Implements [`Read`], so it can be passed to anything that
/// consumes a byte stream. Dropping the handle closes it.
pub struct ReaderHandle {
    shared: Arc<Shared>,
    id: usize,
}

impl ReaderHandle {
    pub(super) fn new(shared: Arc<Shared>, id: usize) -> Self {
        Self { shared, id }
    }

    /// Absolute stream offset of the next byte this handle will read.
    pub fn position(&self) -> u64 {
        self.shared.lock().readers[self.id].position
    }

    /// Reads a single byte. Returns `None` at end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_into(&mut byte, 0, 1)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Reads up to `len` bytes into `buf[offset..offset + len]`.
    ///
    /// Returns the number of bytes copied, which is less than `len` only when
    /// fewer bytes are available right now. Returns 0 at end of stream (or
    /// when `len` is 0).
    ///
    /// # Errors
    /// - [`FanoutError::InvalidArgument`] if the range does not fit in `buf`
    /// - [`FanoutError::Closed`] if this handle was closed, or the fanout was
    ///   closed before the transfer finished
    /// - [`FanoutError::Source`] once buffered data runs out after the source
    ///   failed
    pub fn read_into(&mut self, buf: &mut [u8], offset: usize, len: usize) -> Result<usize> {
        if offset.checked_add(len).map_or(true, |end| end > buf.len()) {
            return Err(FanoutError::InvalidArgument(format!(
                "Offset + length ({} + {}) exceeds buffer size ({})",
                offset,
                len,
                buf.len()
            )));
        }
        if len == 0 {
            self.shared.lock().check_readable(self.id)?;
            return Ok(0);
        }

        let (mut state, available) = self.shared.wait_readable(self.id)?;
        if available == 0 {
            return Ok(0);
        }

        let count = (len as u64).min(available) as usize;
        let position = state.readers[self.id].position;
        state
            .ring
            .copy_to(position, &mut buf[offset..offset + count]);
        state.readers[self.id].position += count as u64;
        drop(state);

        // Lets the producer reclaim what this read consumed
        self.shared.notify();
        Ok(count)
    }

    /// Bytes that can be read right now without blocking. 0 once closed.
    pub fn available(&self) -> usize {
        let state = self.shared.lock();
        let slot = &state.readers[self.id];
        if slot.closed {
            return 0;
        }
        let available = state.total_bytes_read().saturating_sub(slot.position);
        usize::try_from(available).unwrap_or(usize::MAX)
    }

    /// Skips up to `n` bytes without copying them, blocking like a read until
    /// some data is available. Returns the number of bytes skipped; 0 at end
    /// of stream.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        if n == 0 {
            self.shared.lock().check_readable(self.id)?;
            return Ok(0);
        }

        let (mut state, available) = self.shared.wait_readable(self.id)?;
        let skipped = n.min(available);
        state.readers[self.id].position += skipped;
        drop(state);

        if skipped > 0 {
            self.shared.notify();
        }
        Ok(skipped)
    }

    /// Stops reading. The producer no longer waits for this handle, and
    /// further reads fail. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        let slot = state.readers[self.id];
        if slot.closed {
            return;
        }
        state.readers[self.id].closed = true;
        let early = !state.is_at_end(slot.position);
        drop(state);

        self.shared.notify();
        if early {
            debug!(
                reader = self.id,
                position = slot.position,
                "Reader closed before end of stream"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().readers[self.id].closed
    }
}

impl Read for ReaderHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Ok(self.read_into(buf, 0, len)?)
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderHandle").field("id", &self.id).finish()
    }
}
