//! Buffered primitive reader
//!
//! Mirror image of [`DataOutput`](crate::DataOutput): primitives are decoded
//! straight out of the buffer when enough bytes are present and fall back
//! to a byte-at-a-time path across refill boundaries.

use crate::byte_io::ByteInput;
use crate::error::StreamError;
use crate::output::DEFAULT_BUFFER_SIZE;
use crate::utf;

/// Buffered primitive reader bound to a source between `start` and `finish`
pub struct DataInput {
    buffer: Box<[u8]>,
    position: usize,
    limit: usize,
    source: Option<Box<dyn ByteInput>>,
    /// Bytes handed to the caller since `start`
    consumed: u64,
}

impl DataInput {
    /// Create an unbound reader with the given buffer capacity
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0u8; buffer_size.max(1)].into_boxed_slice(),
            position: 0,
            limit: 0,
            source: None,
            consumed: 0,
        }
    }

    /// Whether a source is bound
    pub fn is_active(&self) -> bool {
        self.source.is_some()
    }

    /// Bytes consumed by the caller since `start`
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Bind a source and reset the buffer
    pub fn start(&mut self, source: Box<dyn ByteInput>) {
        self.position = 0;
        self.limit = 0;
        self.consumed = 0;
        self.source = Some(source);
    }

    /// Discard buffered bytes and release the source
    pub fn finish(&mut self) -> Result<Box<dyn ByteInput>, StreamError> {
        self.position = 0;
        self.limit = 0;
        self.source.take().ok_or(StreamError::NotActive)
    }

    /// Discard buffered bytes, close the source and unbind it
    pub fn close(&mut self) -> Result<(), StreamError> {
        let mut source = self.finish()?;
        source.close()
    }

    /// Refill an exhausted buffer. Returns `false` at end of input.
    fn fill(&mut self) -> Result<bool, StreamError> {
        let source = self.source.as_mut().ok_or(StreamError::NotActive)?;
        let n = source.read(&mut self.buffer)?;
        self.position = 0;
        self.limit = n;
        Ok(n > 0)
    }

    #[inline]
    fn buffered(&self) -> usize {
        self.limit - self.position
    }

    /// Read one byte, or `None` at end of input
    pub fn read_opt_u8(&mut self) -> Result<Option<u8>, StreamError> {
        if self.source.is_none() {
            return Err(StreamError::NotActive);
        }
        if self.position == self.limit && !self.fill()? {
            return Ok(None);
        }
        let b = self.buffer[self.position];
        self.position += 1;
        self.consumed += 1;
        Ok(Some(b))
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        self.read_opt_u8()?.ok_or(StreamError::EndOfStream)
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let mut out = [0u8; N];
        if self.buffered() >= N {
            out.copy_from_slice(&self.buffer[self.position..self.position + N]);
            self.position += N;
            self.consumed += N as u64;
        } else {
            // straddles a refill
            for slot in out.iter_mut() {
                *slot = self.read_u8()?;
            }
        }
        Ok(out)
    }

    /// Read one signed byte
    pub fn read_i8(&mut self) -> Result<i8, StreamError> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a boolean; any non-zero byte is `true`
    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    /// Read a big-endian 16-bit signed integer
    pub fn read_i16(&mut self) -> Result<i16, StreamError> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    /// Read a big-endian 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, StreamError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    /// Read a big-endian 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    /// Read an IEEE-754 single
    pub fn read_f32(&mut self) -> Result<f32, StreamError> {
        Ok(f32::from_bits(u32::from_be_bytes(self.take()?)))
    }

    /// Read an IEEE-754 double
    pub fn read_f64(&mut self) -> Result<f64, StreamError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take()?)))
    }

    /// Read up to `buf.len()` bytes; returns 0 only at end of input
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if self.source.is_none() {
            return Err(StreamError::NotActive);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered() == 0 {
            // large reads skip the buffer entirely
            if buf.len() >= self.buffer.len() {
                let source = self.source.as_mut().ok_or(StreamError::NotActive)?;
                let n = source.read(buf)?;
                self.consumed += n as u64;
                return Ok(n);
            }
            if !self.fill()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.buffered());
        buf[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
        self.position += n;
        self.consumed += n as u64;
        Ok(n)
    }

    /// Fill `buf` completely or fail with `EndOfStream`
    pub fn read_fully(&mut self, buf: &mut [u8]) -> Result<(), StreamError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(StreamError::EndOfStream);
            }
            filled += n;
        }
        Ok(())
    }

    /// Read exactly `len` bytes into a new vector
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        let mut out = vec![0u8; len];
        self.read_fully(&mut out)?;
        Ok(out)
    }

    /// Skip up to `count` bytes
    pub fn skip(&mut self, count: u64) -> Result<u64, StreamError> {
        if self.source.is_none() {
            return Err(StreamError::NotActive);
        }
        let from_buffer = (self.buffered() as u64).min(count);
        self.position += from_buffer as usize;
        let mut skipped = from_buffer;
        if skipped < count {
            let source = self.source.as_mut().ok_or(StreamError::NotActive)?;
            skipped += source.skip(count - skipped)?;
        }
        self.consumed += skipped;
        Ok(skipped)
    }

    /// Skip exactly `count` bytes or fail with `EndOfStream`
    pub fn skip_fully(&mut self, count: u64) -> Result<(), StreamError> {
        let mut remaining = count;
        while remaining > 0 {
            let n = self.skip(remaining)?;
            if n == 0 {
                // some sources cannot skip; probe with a read
                self.read_u8()?;
                remaining -= 1;
            } else {
                remaining -= n;
            }
        }
        Ok(())
    }

    /// Bytes readable without blocking
    pub fn available(&mut self) -> Result<usize, StreamError> {
        let buffered = self.buffered();
        let source = self.source.as_mut().ok_or(StreamError::NotActive)?;
        Ok(buffered + source.available()?)
    }

    // ===== Strings =====

    /// Read a string with a two-byte encoded-length prefix
    pub fn read_utf(&mut self) -> Result<String, StreamError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_vec(len)?;
        utf::decode(&bytes)
    }

    /// Read a string of exactly `units` UTF-16 code units with no prefix
    pub fn read_utf_units(&mut self, units: usize) -> Result<String, StreamError> {
        // cap the pre-allocation; the length is untrusted
        let mut out = Vec::with_capacity(units.min(self.buffer.len()));
        let mut offset = 0usize;
        for _ in 0..units {
            let first = self.read_u8()?;
            let mut width = 1;
            let unit = utf::decode_unit(first, offset, || {
                width += 1;
                self.read_u8()
            })?;
            offset += width;
            out.push(unit);
        }
        utf::units_to_string(&out)
    }

    /// Read a zero-terminated string
    pub fn read_utf_terminated(&mut self) -> Result<String, StreamError> {
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let first = self.read_u8()?;
            if first == 0 {
                return utf::units_to_string(&out);
            }
            let mut width = 1;
            let unit = utf::decode_unit(first, offset, || {
                width += 1;
                self.read_u8()
            })?;
            offset += width;
            out.push(unit);
        }
    }
}

impl Default for DataInput {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl std::fmt::Debug for DataInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataInput")
            .field("capacity", &self.buffer.len())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("active", &self.source.is_some())
            .field("consumed", &self.consumed)
            .finish()
    }
}
