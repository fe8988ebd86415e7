use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::io;

/// The writable buffer a route handler fills with a complete response.
///
/// Whatever the handler leaves in it is written to the transport verbatim,
/// so it must hold a full status line, headers and body.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    data: BytesMut,
}

impl ResponseBuffer {
    /// Create a new buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Append raw bytes
    pub fn put(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    pub fn put_str(&mut self, text: &str) {
        self.data.put_slice(text.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a slice of the buffer's data
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Drop everything written so far
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Convert into an immutable, cheaply clonable byte string
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

impl io::Write for ResponseBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.put(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for ResponseBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put_str(s);
        Ok(())
    }
}
