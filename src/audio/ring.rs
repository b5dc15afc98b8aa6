use crate::audio::source::{read_full, ByteSource};
use std::io;

/// Staging buffer for compressed bytes, compacted in place as they are consumed.
///
/// Occupied bytes always start at offset 0.
#[derive(Debug)]
pub struct RawByteRing {
    buf: Box<[u8]>,
    len: usize,
}

impl RawByteRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn below_half(&self) -> bool {
        self.len < self.buf.len() / 2
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Fills the free tail, reading until it is full or the source reports EOF.
    ///
    /// Short reads are retried so a frame is never split by the read size.
    /// Returns the byte count; 0 only when the source is exhausted.
    pub fn fill_from<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> io::Result<usize> {
        if self.len == self.buf.len() {
            return Ok(0);
        }
        let n = read_full(source, &mut self.buf[self.len..])?;
        self.len += n;
        Ok(n)
    }

    /// Drops `count` leading bytes (clamped to what is held).
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.buf.copy_within(count..self.len, 0);
        self.len -= count;
    }
}
