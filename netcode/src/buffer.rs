//! Growable FIFO byte buffer for staging raw transport I/O.
//!
//! This is example plumbing for an in-tree demonstration [`crate::transport::Transport`],
//! kept separate from [`crate::bitcodec`] so the bit-level codec itself stays
//! transport-agnostic: a `Buffer` moves bytes between a socket and a connection's inbox,
//! the `Writer`/`Reader` pair only ever sees the resulting byte slices.

use slice_deque::SliceDeque;
use std::io;

/// Buffer capacity must be a multiple of this so growth stays page-aligned.
const SIZE_INCREMENT: usize = 65536;

/// A double-ended FIFO byte queue: data is appended at the head and read from the tail.
pub struct Buffer {
    data: SliceDeque<u8>,
    capacity: usize,
}

impl Buffer {
    /// Creates a buffer with room for `capacity` bytes. `capacity` must be a multiple of
    /// [`SIZE_INCREMENT`].
    pub fn new(capacity: usize) -> Buffer {
        assert!(
            capacity % SIZE_INCREMENT == 0,
            "buffer capacity must be divisible by {}, got {}",
            SIZE_INCREMENT,
            capacity
        );
        let mut data = SliceDeque::new();
        data.reserve(capacity);
        Buffer { data, capacity }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn free_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    pub fn clear(&mut self) {
        let len = self.len() as isize;
        unsafe { self.data.move_head(len) };
    }

    /// Slice of the bytes currently queued, tail-first.
    pub fn read_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Writes the queued bytes out to `writer`, draining everything that was written.
    /// Stops (without error) the moment the writer reports it would block.
    pub fn egress<W: io::Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let start_len = self.data.len();
        while !self.data.is_empty() {
            match writer.write(&self.data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(count) => unsafe { self.data.move_head(count as isize) },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(start_len - self.data.len())
    }

    /// Reads bytes from `reader` into the buffer until it would block, the reader is
    /// exhausted, or `capacity` is reached (the latter is a caller error: the connection
    /// is reading faster than it is being drained).
    pub fn ingress<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let start_free = self.free_capacity();
        loop {
            if self.data.len() >= self.capacity {
                return Err(io::Error::new(io::ErrorKind::Other, "buffer overrun"));
            }
            unsafe {
                let slot = self.data.tail_head_slice();
                match reader.read(slot) {
                    Ok(0) => return Ok(start_free - self.free_capacity()),
                    Ok(count) => self.data.move_tail(count as isize),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(start_free - self.free_capacity())
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_a_cursor() {
        let mut buffer = Buffer::new(SIZE_INCREMENT);
        let mut src = Cursor::new(vec![1u8, 2, 3, 4]);
        buffer.ingress(&mut src).unwrap();
        assert_eq!(buffer.read_slice(), &[1, 2, 3, 4]);

        let mut dst = Cursor::new(Vec::new());
        let written = buffer.egress(&mut dst).unwrap();
        assert_eq!(written, 4);
        assert!(buffer.is_empty());
        assert_eq!(dst.get_ref().as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "buffer capacity must be divisible by 65536")]
    fn rejects_misaligned_capacity() {
        Buffer::new(100);
    }
}
