use corenet::shared::{SizedRead, SizedWrite};
use std::io;

/// A growable, position-tracked byte container backing every wire-format read/write in this
/// crate (section 4.1). Writes always append; reads advance an internal cursor and fail
/// predictably — rather than panicking or corrupting state — when fewer bytes remain than
/// requested. Multi-byte values are written little-endian by convention of the `byteorder`
/// calls made against it (see `net::envelope` and `net::messages`), never by anything in
/// this type itself.
pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl ByteBuffer {
    #[inline]
    pub fn new() -> ByteBuffer {
        ByteBuffer {
            data: Vec::new(),
            read_pos: 0,
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> ByteBuffer {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Wraps already-serialized bytes for reading (e.g. a datagram just pulled off the wire).
    #[inline]
    pub fn from_vec(data: Vec<u8>) -> ByteBuffer {
        ByteBuffer { data, read_pos: 0 }
    }

    /// Total number of bytes written so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read cursor position.
    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Bytes available to be read before the cursor reaches the end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Rewinds the read cursor to the start without touching the written data.
    #[inline]
    pub fn reset_read(&mut self) {
        self.read_pos = 0;
    }

    /// Empties the buffer and rewinds the cursor.
    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Reserves capacity for at least `additional` more bytes without reallocating.
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    /// A view of the entire written region, irrespective of read position.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Writes raw bytes, extending the buffer unconditionally.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Reads exactly `count` bytes, advancing the cursor. Fails predictably — without
    /// touching the cursor — if fewer bytes remain than requested.
    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> io::Result<&[u8]> {
        if self.remaining() < count {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.data[start..self.read_pos])
    }
}

impl io::Write for ByteBuffer {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for ByteBuffer {
    /// Reads either the full amount requested or nothing at all — never a short read. This
    /// keeps `byteorder`'s typed readers (built on `read_exact`) from leaving the cursor
    /// mid-value on failure: a failed typed read never advances the position.
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.len() > self.remaining() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let count = buf.len();
        buf.copy_from_slice(&self.data[self.read_pos..self.read_pos + count]);
        self.read_pos += count;
        Ok(count)
    }
}

impl SizedWrite for ByteBuffer {
    /// The buffer is growable, so free capacity is unbounded from the caller's perspective;
    /// `Serialize` impls that check this before writing never see `Wait` from a `ByteBuffer`.
    #[inline]
    fn free_capacity(&self) -> usize {
        usize::max_value() - self.data.len()
    }
}

impl SizedRead for ByteBuffer {
    #[inline]
    fn remaining_data(&self) -> usize {
        self.remaining()
    }
}

impl Default for ByteBuffer {
    #[inline]
    fn default() -> ByteBuffer {
        ByteBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

    #[test]
    fn test_typed_roundtrip() {
        let mut buffer = ByteBuffer::new();

        buffer.write_u8(7).unwrap();
        buffer.write_i16::<LittleEndian>(-300).unwrap();
        buffer.write_u32::<LittleEndian>(123_456).unwrap();
        buffer.write_u64::<LittleEndian>(9_000_000_000).unwrap();
        buffer.write_f32::<LittleEndian>(1.5).unwrap();
        buffer.write_f64::<LittleEndian>(2.25).unwrap();

        assert_eq!(buffer.read_u8().unwrap(), 7);
        assert_eq!(buffer.read_i16::<LittleEndian>().unwrap(), -300);
        assert_eq!(buffer.read_u32::<LittleEndian>().unwrap(), 123_456);
        assert_eq!(buffer.read_u64::<LittleEndian>().unwrap(), 9_000_000_000);
        assert_eq!(buffer.read_f32::<LittleEndian>().unwrap(), 1.5);
        assert_eq!(buffer.read_f64::<LittleEndian>().unwrap(), 2.25);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_read_past_end_is_recoverable() {
        let mut buffer = ByteBuffer::new();
        buffer.write_u8(1).unwrap();

        let result = buffer.read_u32::<LittleEndian>();

        assert!(result.is_err());
        // The cursor is left in a well-defined place: nothing was consumed by the failed read.
        assert_eq!(buffer.read_position(), 0);
    }

    #[test]
    fn test_raw_bytes() {
        let mut buffer = ByteBuffer::new();
        buffer.write_bytes(&[1, 2, 3, 4]);

        assert_eq!(buffer.read_bytes(2).unwrap(), &[1, 2]);
        assert_eq!(buffer.read_bytes(2).unwrap(), &[3, 4]);
        assert!(buffer.read_bytes(1).is_err());
    }

    #[test]
    fn test_reset_and_clear() {
        let mut buffer = ByteBuffer::new();
        buffer.write_u32::<LittleEndian>(42).unwrap();
        let _ = buffer.read_u32::<LittleEndian>().unwrap();

        buffer.reset_read();
        assert_eq!(buffer.read_position(), 0);
        assert_eq!(buffer.read_u32::<LittleEndian>().unwrap(), 42);

        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.read_position(), 0);
    }
}
