//! Circular byte buffer addressed by absolute stream positions.
//!
//! The ring holds the window `[start, start + len)` of a logical, ever-growing
//! stream. The byte at absolute position `p` lives at index `p % capacity`.
//! Bytes are appended at the end of the window by the producer and released
//! from the front once every open reader has moved past them.
//!
//! # Invariants
//! - `len <= capacity`
//! - `start` only moves forward, and never past `start + len`

pub(crate) struct RingBuffer {
    buf: Box<[u8]>,
    start: u64,
    len: usize,
}

impl RingBuffer {
    /// # Panics
    /// Panics if `capacity == 0`.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Absolute position of the first retained byte.
    pub(crate) fn start_position(&self) -> u64 {
        self.start
    }

    /// Absolute position one past the last retained byte.
    pub(crate) fn end_position(&self) -> u64 {
        self.start + self.len as u64
    }

    /// Number of valid bytes currently held.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity() - self.len
    }

    fn index_of(&self, position: u64) -> usize {
        (position % self.capacity() as u64) as usize
    }

    /// Sizes of the free region as up to two contiguous runs: from the write
    /// offset to the end of the array, then from index 0.
    pub(crate) fn free_runs(&self) -> (usize, usize) {
        let free = self.free();
        let to_end = self.capacity() - self.index_of(self.end_position());
        if free <= to_end {
            (free, 0)
        } else {
            (to_end, free - to_end)
        }
    }

    /// Appends bytes at the end of the window.
    ///
    /// # Panics
    /// Panics if `data` does not fit in the free space.
    pub(crate) fn append(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.free(),
            "append of {} bytes exceeds free space ({} of {})",
            data.len(),
            self.free(),
            self.capacity()
        );
        if data.is_empty() {
            return;
        }

        let offset = self.index_of(self.end_position());
        let to_end = self.capacity() - offset;
        if data.len() <= to_end {
            self.buf[offset..offset + data.len()].copy_from_slice(data);
        } else {
            self.buf[offset..].copy_from_slice(&data[..to_end]);
            self.buf[..data.len() - to_end].copy_from_slice(&data[to_end..]);
        }
        self.len += data.len();
    }

    /// Releases every byte before `position`. Returns the number of bytes
    /// released; positions at or before the current start release nothing.
    ///
    /// # Panics
    /// Panics if `position` is beyond the end of the window.
    pub(crate) fn release_until(&mut self, position: u64) -> usize {
        assert!(
            position <= self.end_position(),
            "cannot release up to {} past buffer end {}",
            position,
            self.end_position()
        );
        if position <= self.start {
            return 0;
        }
        let released = (position - self.start) as usize;
        self.start = position;
        self.len -= released;
        released
    }

    /// Copies `dest.len()` bytes starting at absolute `position` into `dest`.
    ///
    /// # Panics
    /// Panics if the requested range is not entirely inside the window. That
    /// means reader and producer bookkeeping disagree, which is a bug here
    /// rather than bad input.
    pub(crate) fn copy_to(&self, position: u64, dest: &mut [u8]) {
        assert!(
            position >= self.start,
            "Position {} is before buffer start {}",
            position,
            self.start
        );
        let end = position + dest.len() as u64;
        assert!(
            end <= self.end_position(),
            "Read request at position {} with length {} exceeds valid data (buffer start: {}, valid bytes: {})",
            position,
            dest.len(),
            self.start,
            self.len
        );
        if dest.is_empty() {
            return;
        }

        let offset = self.index_of(position);
        let to_end = self.capacity() - offset;
        if dest.len() <= to_end {
            dest.copy_from_slice(&self.buf[offset..offset + dest.len()]);
        } else {
            dest[..to_end].copy_from_slice(&self.buf[offset..]);
            let rest = dest.len() - to_end;
            dest[to_end..].copy_from_slice(&self.buf[..rest]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_append_and_copy_without_wrap() {
        let mut ring = RingBuffer::with_capacity(8);
        ring.append(b"abcde");
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.free(), 3);

        let mut out = [0u8; 3];
        ring.copy_to(1, &mut out);
        assert_eq!(&out, b"bcd");
    }

    #[test]
    fn test_wrapped_append_is_split() {
        let mut ring = RingBuffer::with_capacity(8);
        ring.append(b"abcdef");
        assert_eq!(ring.release_until(5), 5);
        assert_eq!(ring.start_position(), 5);

        // Write offset is 6, so 2 bytes fit before the end and 5 after index 0
        assert_eq!(ring.free_runs(), (2, 5));
        ring.append(b"ghijklm");
        assert_eq!(ring.len(), 8);
        assert_eq!(ring.free_runs(), (0, 0));

        let mut out = [0u8; 8];
        ring.copy_to(5, &mut out);
        assert_eq!(&out, b"fghijklm");
    }

    #[test]
    fn test_release_before_start_is_noop() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.append(b"abcd");
        ring.release_until(2);
        assert_eq!(ring.release_until(1), 0);
        assert_eq!(ring.start_position(), 2);
        assert_eq!(ring.end_position(), 4);
    }

    #[test]
    #[should_panic(expected = "before buffer start")]
    fn test_copy_of_released_range_panics() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.append(b"abcd");
        ring.release_until(2);
        let mut out = [0u8; 1];
        ring.copy_to(1, &mut out);
    }

    #[test]
    #[should_panic(expected = "exceeds valid data")]
    fn test_copy_past_end_panics() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.append(b"ab");
        let mut out = [0u8; 3];
        ring.copy_to(0, &mut out);
    }

    #[test]
    #[should_panic(expected = "exceeds free space")]
    fn test_overfull_append_panics() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.append(b"abcde");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(usize),
        Release(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..64).prop_map(Op::Append),
            (0usize..64).prop_map(Op::Release),
        ]
    }

    proptest! {
        // Every retained range reads back exactly what a linear,
        // unbounded copy of the stream holds at the same positions.
        #[test]
        fn prop_matches_linear_model(
            capacity in 1usize..50,
            ops in prop::collection::vec(op(), 1..200),
        ) {
            let mut ring = RingBuffer::with_capacity(capacity);
            let mut model: Vec<u8> = Vec::new();
            let mut next = 0u8;

            for op in ops {
                match op {
                    Op::Append(n) => {
                        let n = n.min(ring.free());
                        let data: Vec<u8> = (0..n)
                            .map(|_| {
                                next = next.wrapping_mul(31).wrapping_add(7);
                                next
                            })
                            .collect();
                        ring.append(&data);
                        model.extend_from_slice(&data);
                    }
                    Op::Release(n) => {
                        let target = (ring.start_position() + n as u64).min(ring.end_position());
                        ring.release_until(target);
                    }
                }

                prop_assert!(ring.len() <= ring.capacity());
                prop_assert_eq!(ring.end_position(), model.len() as u64);

                let start = ring.start_position();
                let mut out = vec![0u8; ring.len()];
                ring.copy_to(start, &mut out);
                prop_assert_eq!(&out[..], &model[start as usize..]);

                let (first, second) = ring.free_runs();
                prop_assert_eq!(first + second, ring.free());
            }
        }
    }
}
