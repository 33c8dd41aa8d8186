//! Buffered primitive writer
//!
//! [`DataOutput`] owns a fixed-capacity buffer and emits big-endian
//! primitives and modified UTF-8 strings into it, flushing to the bound
//! [`ByteOutput`] whenever a write would overflow.

use crate::byte_io::ByteOutput;
use crate::error::StreamError;
use crate::utf;

/// Default buffer capacity in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Smallest capacity that still fits every fixed-width primitive
const MIN_BUFFER_SIZE: usize = 8;

/// Buffered primitive writer bound to a sink between `start` and `finish`
pub struct DataOutput {
    buffer: Box<[u8]>,
    position: usize,
    sink: Option<Box<dyn ByteOutput>>,
    /// Bytes handed to the sink plus bytes currently buffered
    written: u64,
}

impl DataOutput {
    /// Create an unbound writer with the given buffer capacity
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0u8; buffer_size.max(MIN_BUFFER_SIZE)].into_boxed_slice(),
            position: 0,
            sink: None,
            written: 0,
        }
    }

    /// Buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a sink is bound
    pub fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    /// Total bytes accepted since `start`
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Bind a sink and reset the buffer
    pub fn start(&mut self, sink: Box<dyn ByteOutput>) {
        self.position = 0;
        self.written = 0;
        self.sink = Some(sink);
    }

    /// Flush buffered bytes and release the sink
    pub fn finish(&mut self) -> Result<Box<dyn ByteOutput>, StreamError> {
        self.drain()?;
        let mut sink = self.sink.take().ok_or(StreamError::NotActive)?;
        sink.flush()?;
        Ok(sink)
    }

    /// Flush buffered bytes and flush the sink
    pub fn flush(&mut self) -> Result<(), StreamError> {
        self.drain()?;
        self.sink_mut()?.flush()
    }

    /// Flush, close the sink and unbind it
    pub fn close(&mut self) -> Result<(), StreamError> {
        self.drain()?;
        let mut sink = self.sink.take().ok_or(StreamError::NotActive)?;
        sink.close()
    }

    fn sink_mut(&mut self) -> Result<&mut Box<dyn ByteOutput>, StreamError> {
        self.sink.as_mut().ok_or(StreamError::NotActive)
    }

    /// Hand buffered bytes to the sink without flushing the sink itself
    fn drain(&mut self) -> Result<(), StreamError> {
        if self.position > 0 {
            let sink = self.sink.as_mut().ok_or(StreamError::NotActive)?;
            sink.write(&self.buffer[..self.position])?;
            self.position = 0;
        }
        Ok(())
    }

    /// Make room for `n` contiguous bytes
    #[inline]
    fn reserve(&mut self, n: usize) -> Result<(), StreamError> {
        if self.sink.is_none() {
            return Err(StreamError::NotActive);
        }
        if self.buffer.len() - self.position < n {
            self.drain()?;
        }
        Ok(())
    }

    #[inline]
    fn put<const N: usize>(&mut self, bytes: [u8; N]) -> Result<(), StreamError> {
        self.reserve(N)?;
        self.buffer[self.position..self.position + N].copy_from_slice(&bytes);
        self.position += N;
        self.written += N as u64;
        Ok(())
    }

    // ===== Primitives =====

    /// Write one byte
    pub fn write_u8(&mut self, value: u8) -> Result<(), StreamError> {
        self.put([value])
    }

    /// Write one signed byte
    pub fn write_i8(&mut self, value: i8) -> Result<(), StreamError> {
        self.put(value.to_be_bytes())
    }

    /// Write a boolean as a single 0/1 byte
    pub fn write_bool(&mut self, value: bool) -> Result<(), StreamError> {
        self.put([value as u8])
    }

    /// Write a big-endian 16-bit unsigned integer
    pub fn write_u16(&mut self, value: u16) -> Result<(), StreamError> {
        self.put(value.to_be_bytes())
    }

    /// Write a big-endian 16-bit signed integer
    pub fn write_i16(&mut self, value: i16) -> Result<(), StreamError> {
        self.put(value.to_be_bytes())
    }

    /// Write a big-endian 32-bit signed integer
    pub fn write_i32(&mut self, value: i32) -> Result<(), StreamError> {
        self.put(value.to_be_bytes())
    }

    /// Write a big-endian 64-bit signed integer
    pub fn write_i64(&mut self, value: i64) -> Result<(), StreamError> {
        self.put(value.to_be_bytes())
    }

    /// Write an IEEE-754 single as its raw bits
    pub fn write_f32(&mut self, value: f32) -> Result<(), StreamError> {
        self.put(value.to_bits().to_be_bytes())
    }

    /// Write an IEEE-754 double as its raw bits
    pub fn write_f64(&mut self, value: f64) -> Result<(), StreamError> {
        self.put(value.to_bits().to_be_bytes())
    }

    /// Write a byte slice
    ///
    /// Slices larger than half the buffer skip the copy and go straight to
    /// the sink once pending bytes are flushed.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        if self.sink.is_none() {
            return Err(StreamError::NotActive);
        }
        let free = self.buffer.len() - self.position;
        if bytes.len() <= free {
            self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
            self.position += bytes.len();
        } else {
            self.drain()?;
            if bytes.len() >= self.buffer.len() / 2 {
                self.sink_mut()?.write(bytes)?;
            } else {
                self.buffer[..bytes.len()].copy_from_slice(bytes);
                self.position = bytes.len();
            }
        }
        self.written += bytes.len() as u64;
        Ok(())
    }

    // ===== Strings =====

    /// Write a string with a two-byte encoded-length prefix
    pub fn write_utf(&mut self, value: &str) -> Result<(), StreamError> {
        let len = utf::encoded_len(value);
        if len > utf::MAX_PREFIXED_LEN {
            return Err(StreamError::UtfTooLong(len));
        }
        self.write_u16(len as u16)?;
        self.write_utf_unprefixed(value)
    }

    /// Write the encoded bytes of a string with no length information
    ///
    /// The reader must learn the UTF-16 length some other way.
    pub fn write_utf_unprefixed(&mut self, value: &str) -> Result<(), StreamError> {
        let mut scratch = [0u8; 3];
        for unit in value.encode_utf16() {
            let n = utf::encode_unit(unit, &mut scratch);
            match n {
                1 => self.put([scratch[0]])?,
                2 => self.put([scratch[0], scratch[1]])?,
                _ => self.put([scratch[0], scratch[1], scratch[2]])?,
            }
        }
        Ok(())
    }

    /// Write a string followed by a single zero byte
    pub fn write_utf_terminated(&mut self, value: &str) -> Result<(), StreamError> {
        self.write_utf_unprefixed(value)?;
        self.write_u8(0)
    }
}

impl Default for DataOutput {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl std::fmt::Debug for DataOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataOutput")
            .field("capacity", &self.buffer.len())
            .field("position", &self.position)
            .field("active", &self.sink.is_some())
            .field("written", &self.written)
            .finish()
    }
}
