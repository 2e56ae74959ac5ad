//! Accumulation buffer for partial reads.
//!
//! Retains unconsumed bytes across transport reads. The buffer is bounded:
//! once it holds `max_size` bytes without a frame boundary being found the
//! detector reports an overflow and clears it.

use crate::error::WireError;
use crate::strategy::HARD_MAX_BUFFER_SIZE;
use bytes::{Buf, BytesMut};

/// Append-only byte buffer with a size limit
#[derive(Debug)]
pub struct AccumulationBuffer {
    buf: BytesMut,
    max_size: usize,
}

impl AccumulationBuffer {
    /// Create a buffer with the given limit
    pub fn new(max_size: usize) -> Result<Self, WireError> {
        if max_size == 0 || max_size > HARD_MAX_BUFFER_SIZE {
            return Err(WireError::BufferLimit(max_size));
        }
        Ok(Self {
            buf: BytesMut::with_capacity(max_size.min(64 * 1024)),
            max_size,
        })
    }

    /// Append bytes, preserving arrival order
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Remove the first `n` bytes
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }

    /// Buffered bytes, without copying
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Configured limit
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// True when the buffer has reached its limit
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.max_size
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
