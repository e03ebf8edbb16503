//! Frame buffering and resynchronization.
//!
//! CM160 frames carry no length header or delimiter. A frame boundary is only
//! recognised by its content, so the buffer hands out fixed windows of
//! [`FRAME_LEN`] bytes and the decoder reports how much of each window it used:
//!
//! ```text
//! consumed = 11  regular frame
//! consumed = 10  history record missing its minute byte
//! consumed = 0   no match, drop one byte and try again
//! ```
//!
//! Dropping a single byte on failure guarantees forward progress and lets the
//! stream realign on the next valid frame.

use bytes::{Buf, BytesMut};

use crate::constants::{BUFFER_CAPACITY, FRAME_LEN};
use crate::error::ProtocolError;

/// Bounded receive buffer for one device.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes received and not yet consumed, oldest first.
    buffer: BytesMut,
    /// Maximum number of buffered bytes.
    capacity: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Create a buffer with the standard capacity.
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        FrameBuffer {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append received bytes.
    ///
    /// Nothing is appended if the data does not fit.
    pub fn push(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let attempted = self.buffer.len() + data.len();
        if attempted > self.capacity {
            return Err(ProtocolError::BufferOverflow {
                capacity: self.capacity,
                attempted,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Copy out the first full frame window, if one is buffered.
    pub fn peek_frame(&self) -> Option<[u8; FRAME_LEN]> {
        let window = self.buffer.get(..FRAME_LEN)?;
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(window);
        Some(frame)
    }

    /// Drop bytes from the front after a decode attempt.
    ///
    /// A `consumed` of zero advances by one byte. Returns the number of bytes
    /// actually dropped.
    pub fn consume(&mut self, consumed: usize) -> usize {
        let stride = consumed.max(1).min(self.buffer.len());
        self.buffer.advance(stride);
        stride
    }

    /// Number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Free space left before the buffer overflows.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// Buffered bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_needs_full_window() {
        let mut buf = FrameBuffer::new();
        buf.push(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        assert!(buf.peek_frame().is_none());

        buf.push(&[11, 12]).unwrap();
        assert_eq!(buf.peek_frame(), Some([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]));
        // Peeking does not consume
        assert_eq!(buf.buffered_len(), 12);
    }

    #[test]
    fn test_consume_zero_advances_one_byte() {
        let mut buf = FrameBuffer::new();
        buf.push(&[0xFF; 11]).unwrap();
        buf.push(&[0x51]).unwrap();

        assert_eq!(buf.consume(0), 1);
        assert_eq!(buf.buffered_len(), 11);
        assert_eq!(buf.as_slice()[10], 0x51);
    }

    #[test]
    fn test_consume_preserves_order() {
        let mut buf = FrameBuffer::new();
        let data: Vec<u8> = (0..25).collect();
        buf.push(&data).unwrap();

        assert_eq!(buf.consume(10), 10);
        assert_eq!(buf.as_slice(), &data[10..]);
        assert_eq!(buf.consume(11), 11);
        assert_eq!(buf.as_slice(), &data[21..]);
    }

    #[test]
    fn test_consume_never_exceeds_buffered() {
        let mut buf = FrameBuffer::new();
        buf.push(&[1, 2, 3]).unwrap();
        assert_eq!(buf.consume(11), 3);
        assert_eq!(buf.consume(0), 0);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut buf = FrameBuffer::with_capacity(16);
        buf.push(&[0u8; 12]).unwrap();
        assert_eq!(buf.remaining(), 4);

        let err = buf.push(&[0u8; 5]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BufferOverflow {
                capacity: 16,
                attempted: 17
            }
        );
        // The rejected bytes were not appended
        assert_eq!(buf.buffered_len(), 12);
    }

    #[test]
    fn test_clear() {
        let mut buf = FrameBuffer::new();
        buf.push(&[9u8; 40]).unwrap();
        buf.clear();
        assert_eq!(buf.buffered_len(), 0);
        assert_eq!(buf.remaining(), BUFFER_CAPACITY);
    }
}
