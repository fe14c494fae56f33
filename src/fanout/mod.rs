//! Share one byte stream between several concurrent readers.
//!
//! A single producer (the thread calling [`StreamFanout::run`]) pulls data
//! from the source into a fixed-size circular buffer. Each consumer owns a
//! [`ReaderHandle`] with its own cursor into that buffer. Space is reclaimed
//! once every open handle has moved past it.
//!
//! # Architecture
//!
//! ```text
//!                        +--------------+     +-------------+
//!                   +--> | ReaderHandle | --> | consumer A  |
//! +--------+   +----+--+ +--------------+     +-------------+
//! | source |-->| ring  |
//! +--------+   +----+--+ +--------------+     +-------------+
//!                   +--> | ReaderHandle | --> | consumer B  |
//!                        +--------------+     +-------------+
//! ```
//!
//! All readers progress through the data at roughly the same pace: if one
//! falls a full buffer behind, the producer stops reading until that reader
//! catches up or closes its handle.
//!
//! Read each handle from its own thread. Reading several handles from one
//! thread works only if none of them gets a full buffer ahead of the others,
//! otherwise that thread deadlocks on itself.

pub mod pipeline;
mod reader;
mod ring;

pub use pipeline::{ConsumerOutcome, FanoutPipeline, PipelineReport};
pub use reader::ReaderHandle;

use crate::config::FanoutConfig;
use crate::error::{FanoutError, Result};
use ring::RingBuffer;
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, trace, warn};

const CLOSED_DURING_TRANSFER: &str = "Fanout was closed before transfer completed";

// =============================================================================
// Shared state
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct ReaderSlot {
    position: u64,
    closed: bool,
}

/// Everything the producer and the readers share, guarded by one mutex.
struct State {
    ring: RingBuffer,
    readers: Vec<ReaderSlot>,
    source_exhausted: bool,
    source_error: Option<FanoutError>,
    closed: bool,
    transfer_started: bool,
    transfer_complete: bool,
}

impl State {
    fn new(buffer_size: usize) -> Self {
        Self {
            ring: RingBuffer::with_capacity(buffer_size),
            readers: Vec::new(),
            source_exhausted: false,
            source_error: None,
            closed: false,
            transfer_started: false,
            transfer_complete: false,
        }
    }

    /// Total bytes pulled from the source. The ring window always ends here.
    fn total_bytes_read(&self) -> u64 {
        self.ring.end_position()
    }

    fn is_at_end(&self, position: u64) -> bool {
        self.source_exhausted && position >= self.total_bytes_read()
    }

    fn is_active(&self, slot: &ReaderSlot) -> bool {
        !slot.closed && !self.is_at_end(slot.position)
    }

    fn active_readers(&self) -> usize {
        self.readers.iter().filter(|r| self.is_active(r)).count()
    }

    fn any_active(&self) -> bool {
        self.readers.iter().any(|r| self.is_active(r))
    }

    /// Releases buffer space no open reader will read again. A reader that
    /// reached the end without closing sits at `total_bytes_read`, so it never
    /// holds anything back.
    fn reclaim(&mut self) -> usize {
        let min_position = self
            .readers
            .iter()
            .filter(|r| !r.closed)
            .map(|r| r.position)
            .min();
        match min_position {
            Some(position) => self.ring.release_until(position),
            None => 0,
        }
    }

    fn check_readable(&self, id: usize) -> Result<()> {
        if self.readers[id].closed {
            return Err(FanoutError::Closed("Stream closed"));
        }
        if self.closed && !self.transfer_complete {
            return Err(FanoutError::Closed(CLOSED_DURING_TRANSFER));
        }
        Ok(())
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    // Invariant checks panic before mutating anything, so a poisoned lock
    // still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Every waiter re-checks its own predicate, so wake all of them.
    fn notify(&self) {
        self.changed.notify_all();
    }

    /// Blocks until reader `id` has data at its position or the stream has
    /// ended. Returns the lock together with the number of readable bytes;
    /// zero means clean end of stream.
    fn wait_readable(&self, id: usize) -> Result<(MutexGuard<'_, State>, u64)> {
        let mut state = self.lock();
        loop {
            state.check_readable(id)?;
            let position = state.readers[id].position;
            let total = state.total_bytes_read();
            if total > position {
                return Ok((state, total - position));
            }
            if state.source_exhausted {
                if let Some(err) = &state.source_error {
                    return Err(err.clone());
                }
                return Ok((state, 0));
            }
            state = self.wait(state);
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time view of a fanout's progress
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutStats {
    /// Bytes pulled from the source so far
    pub bytes_read: u64,

    /// Bytes currently held in the buffer
    pub buffered_bytes: usize,

    /// Absolute stream position of the oldest buffered byte
    pub buffer_start: u64,

    /// Handles created
    pub readers: usize,

    /// Handles neither closed nor at end of stream
    pub active_readers: usize,

    pub source_exhausted: bool,
    pub closed: bool,
}

// =============================================================================
// StreamFanout
// =============================================================================

/// Makes the data of one [`Read`] source available to several concurrent
/// readers without holding the whole stream in memory.
///
/// Typical usage:
/// 1. Create the fanout around the source.
/// 2. Call [`new_reader`](Self::new_reader) once per consumer.
/// 3. Hand each reader to its own thread.
/// 4. Call [`run`](Self::run).
/// 5. Close (or drop) the fanout to release the source.
///
/// [`FanoutPipeline`] wraps these steps.
pub struct StreamFanout<R> {
    source: Mutex<Option<R>>,
    shared: Arc<Shared>,
    config: FanoutConfig,
}

impl<R: Read> StreamFanout<R> {
    /// Wraps `source` with the default 64KB buffer.
    pub fn new(source: R) -> Self {
        Self::build(source, FanoutConfig::default())
    }

    pub fn with_config(source: R, config: FanoutConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(source, config))
    }

    fn build(source: R, config: FanoutConfig) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(config.buffer_size)),
                changed: Condvar::new(),
            }),
            config,
        }
    }

    /// Creates a reader that will see the stream from its first byte.
    /// Readers may start reading immediately; they block until [`run`](Self::run)
    /// supplies data.
    pub fn new_reader(&self) -> Result<ReaderHandle> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(FanoutError::InvalidState(
                "Cannot create new readers after the fanout has been closed",
            ));
        }
        if state.transfer_started {
            return Err(FanoutError::InvalidState(
                "Cannot create new readers after run() has started",
            ));
        }
        let id = state.readers.len();
        state.readers.push(ReaderSlot::default());
        Ok(ReaderHandle::new(Arc::clone(&self.shared), id))
    }

    /// Copies the source into every reader. Blocks until the source is
    /// exhausted and every reader has either read all of it or been closed.
    /// Returns the number of bytes read from the source.
    ///
    /// A source error is handed to every reader that runs out of data and is
    /// returned here once all readers are done. Does not close the source.
    pub fn run(&self) -> Result<u64> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(FanoutError::InvalidState("Fanout has been closed"));
            }
            if state.transfer_started {
                return Err(FanoutError::InvalidState("run() has already been called"));
            }
            state.transfer_started = true;
            debug!(
                readers = state.readers.len(),
                buffer_size = self.config.buffer_size,
                min_read_size = self.config.min_read_size,
                "Starting fanout transfer"
            );
        }

        let pumped = self.pump();

        let mut state = self.shared.lock();
        state.source_exhausted = true;
        if let Err(err @ FanoutError::Source(_)) = &pumped {
            if state.source_error.is_none() {
                state.source_error = Some(err.clone());
            }
        }
        self.shared.notify();

        while state.any_active() && !state.closed {
            state = self.shared.wait(state);
        }

        let total = state.total_bytes_read();
        let complete = !state.any_active();
        if complete && pumped.is_ok() {
            state.transfer_complete = true;
        }
        drop(state);

        match pumped {
            Err(err) => {
                if let Some(source_err) = err.source_error() {
                    warn!(bytes_read = total, error = %source_err, "Fanout source failed");
                }
                Err(err)
            }
            Ok(()) if complete => {
                debug!(bytes_read = total, "Fanout transfer finished");
                Ok(total)
            }
            Ok(()) => Err(FanoutError::Closed(CLOSED_DURING_TRANSFER)),
        }
    }

    /// Producer loop: wait for space, read, publish, until EOF or error.
    fn pump(&self) -> Result<()> {
        let mut scratch = vec![0u8; self.config.buffer_size];

        loop {
            let (first, second) = {
                let mut state = self.shared.lock();
                loop {
                    if state.closed {
                        return Err(FanoutError::Closed(CLOSED_DURING_TRANSFER));
                    }
                    if !state.any_active() {
                        trace!("No active readers left; stopping source reads");
                        return Ok(());
                    }
                    let released = state.reclaim();
                    if released > 0 {
                        trace!(
                            released,
                            buffer_start = state.ring.start_position(),
                            "Reclaimed buffer space"
                        );
                        self.shared.notify();
                    }
                    if state.ring.free() >= self.config.min_read_size {
                        break;
                    }
                    state = self.shared.wait(state);
                }
                state.ring.free_runs()
            };

            // Only the producer adds data, so the free region can only grow
            // while the lock is released.
            let (n, error) = self.read_source(&mut scratch[..first + second], first);

            let mut state = self.shared.lock();
            if n > 0 {
                state.ring.append(&scratch[..n]);
                trace!(bytes = n, total = state.total_bytes_read(), "Read from source");
                self.shared.notify();
            }
            if state.closed {
                drop(state);
                self.release_source();
                return Err(FanoutError::Closed(CLOSED_DURING_TRANSFER));
            }
            match error {
                Some(err) => return Err(FanoutError::Source(Arc::new(err))),
                None if n == 0 => return Ok(()),
                None => {}
            }
        }
    }

    /// Fills `buf` from the source. `first` is the part of `buf` that maps to
    /// the contiguous run before the ring's physical end; the rest is only
    /// read once that run is full. Bytes read before an error are kept.
    fn read_source(&self, buf: &mut [u8], first: usize) -> (usize, Option<io::Error>) {
        let mut guard = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(source) = guard.as_mut() else {
            return (0, None);
        };

        let n1 = match read_retrying(source, &mut buf[..first]) {
            Ok(n) => n,
            Err(err) => return (0, Some(err)),
        };
        if n1 < first || buf.len() == first {
            return (n1, None);
        }
        match read_retrying(source, &mut buf[first..]) {
            Ok(n2) => (n1 + n2, None),
            Err(err) => (n1, Some(err)),
        }
    }
}

impl<R> StreamFanout<R> {
    /// Closes the fanout and releases the source. Readers blocked in a read
    /// fail with [`FanoutError::Closed`] unless the transfer already finished.
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.notify();
        debug!("Fanout closed");

        // If the producer is inside a source read, it drops the source itself
        // once the read returns and it sees the closed flag.
        match self.source.try_lock() {
            Ok(mut source) => drop(source.take()),
            Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
            Err(TryLockError::WouldBlock) => {}
        }
    }

    fn release_source(&self) {
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        drop(source.take());
    }

    pub fn config(&self) -> FanoutConfig {
        self.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn stats(&self) -> FanoutStats {
        let state = self.shared.lock();
        FanoutStats {
            bytes_read: state.total_bytes_read(),
            buffered_bytes: state.ring.len(),
            buffer_start: state.ring.start_position(),
            readers: state.readers.len(),
            active_readers: state.active_readers(),
            source_exhausted: state.source_exhausted,
            closed: state.closed,
        }
    }
}

impl<R> Drop for StreamFanout<R> {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_retrying<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
