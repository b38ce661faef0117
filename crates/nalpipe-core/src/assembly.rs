//! # Frame Assembly Buffer
//!
//! Fixed-capacity scratch space holding stream bytes that have been read but
//! not yet classified into NAL units. Allocated once per session and never
//! grown; the unclassified tail is moved back to offset 0 after every scan
//! pass so a start code split across two reads is seen whole on the next one.
//!
//! ```text
//!   0            cursor              limit           capacity
//!   │ classified │   unclassified    │     free       │
//! ```

use crate::error::StreamError;
use crate::source::{ReadOutcome, StreamSource};

pub struct FrameAssemblyBuffer {
    data: Box<[u8]>,
    limit: usize,
}

impl FrameAssemblyBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            limit: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// First unwritten position.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    pub fn available_space(&self) -> usize {
        self.data.len() - self.limit
    }

    /// The written region `[0, limit)`.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    /// Read once from `source` into `[limit, capacity)`.
    ///
    /// Calling with no free space is a framing fault: the caller is expected
    /// to compact first, so a full buffer means no start code can fit.
    pub fn append_from<S: StreamSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<ReadOutcome, StreamError> {
        let available = self.available_space();
        if available == 0 {
            return Err(StreamError::BufferExhausted {
                capacity: self.capacity(),
            });
        }
        let outcome = source.read(&mut self.data[self.limit..])?;
        if let ReadOutcome::Data(n) = outcome {
            self.limit += n.min(available);
        }
        Ok(outcome)
    }

    /// Move `[from, limit)` to offset 0 and make it the new contents.
    /// Returns the new limit.
    pub fn compact(&mut self, from: usize) -> usize {
        let from = from.min(self.limit);
        self.data.copy_within(from..self.limit, 0);
        self.limit -= from;
        self.limit
    }

    pub fn clear(&mut self) {
        self.limit = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    struct Chunks(VecDeque<Vec<u8>>);

    impl StreamSource for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
            match self.0.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(ReadOutcome::Data(n))
                }
                None => Ok(ReadOutcome::EndOfStream),
            }
        }
    }

    fn chunks(parts: &[&[u8]]) -> Chunks {
        Chunks(parts.iter().map(|p| p.to_vec()).collect())
    }

    #[test]
    fn append_advances_limit() {
        let mut buf = FrameAssemblyBuffer::with_capacity(8);
        let mut src = chunks(&[&[1, 2, 3], &[4, 5]]);

        assert_eq!(buf.append_from(&mut src).unwrap(), ReadOutcome::Data(3));
        assert_eq!(buf.append_from(&mut src).unwrap(), ReadOutcome::Data(2));
        assert_eq!(buf.filled(), &[1, 2, 3, 4, 5]);
        assert_eq!(buf.available_space(), 3);
        assert_eq!(buf.append_from(&mut src).unwrap(), ReadOutcome::EndOfStream);
        assert_eq!(buf.limit(), 5);
    }

    #[test]
    fn read_is_capped_at_free_space() {
        let mut buf = FrameAssemblyBuffer::with_capacity(4);
        let mut src = chunks(&[&[9, 9, 9, 9, 9, 9]]);
        assert_eq!(buf.append_from(&mut src).unwrap(), ReadOutcome::Data(4));
        assert_eq!(buf.available_space(), 0);
    }

    #[test]
    fn full_buffer_reports_exhaustion() {
        let mut buf = FrameAssemblyBuffer::with_capacity(2);
        let mut src = chunks(&[&[1, 2], &[3]]);
        buf.append_from(&mut src).unwrap();
        let err = buf.append_from(&mut src).unwrap_err();
        assert!(matches!(err, StreamError::BufferExhausted { capacity: 2 }));
    }

    #[test]
    fn compact_moves_tail_to_front() {
        let mut buf = FrameAssemblyBuffer::with_capacity(8);
        let mut src = chunks(&[&[0xAA, 0xBB, 0xCC, 0, 0, 0]]);
        buf.append_from(&mut src).unwrap();

        assert_eq!(buf.compact(3), 3);
        assert_eq!(buf.filled(), &[0, 0, 0]);
        assert_eq!(buf.available_space(), 5);

        // Out-of-range start empties the buffer rather than panicking.
        assert_eq!(buf.compact(10), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn compact_from_zero_is_noop() {
        let mut buf = FrameAssemblyBuffer::with_capacity(4);
        let mut src = chunks(&[&[7, 8]]);
        buf.append_from(&mut src).unwrap();
        assert_eq!(buf.compact(0), 2);
        assert_eq!(buf.filled(), &[7, 8]);
        buf.clear();
        assert!(buf.is_empty());
    }
}
