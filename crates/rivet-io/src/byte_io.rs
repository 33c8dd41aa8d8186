//! Byte sources and sinks
//!
//! [`ByteInput`] and [`ByteOutput`] are the transport seam underneath the
//! buffered codec. Adapters are provided for in-memory buffers and for any
//! `std::io::Read` / `std::io::Write`.

use crate::error::StreamError;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

/// Scratch size used by the default `skip` implementation
const SKIP_CHUNK: usize = 512;

/// A source of bytes
pub trait ByteInput: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` on a non-empty buffer means end of input.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Number of bytes that can be read without blocking
    fn available(&mut self) -> Result<usize, StreamError> {
        Ok(0)
    }

    /// Skip up to `count` bytes, returning how many were skipped
    fn skip(&mut self, count: u64) -> Result<u64, StreamError> {
        let mut scratch = [0u8; SKIP_CHUNK];
        let mut skipped = 0u64;
        while skipped < count {
            let want = (count - skipped).min(SKIP_CHUNK as u64) as usize;
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                break;
            }
            skipped += n as u64;
        }
        Ok(skipped)
    }

    /// Release the source
    fn close(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

/// A sink of bytes
pub trait ByteOutput: Send {
    /// Write all of `buf`
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError>;

    /// Push buffered bytes to the transport
    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Flush and release the sink
    fn close(&mut self) -> Result<(), StreamError> {
        self.flush()
    }
}

impl<T: ByteInput + ?Sized> ByteInput for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        (**self).read(buf)
    }

    fn available(&mut self) -> Result<usize, StreamError> {
        (**self).available()
    }

    fn skip(&mut self, count: u64) -> Result<u64, StreamError> {
        (**self).skip(count)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        (**self).close()
    }
}

impl<T: ByteOutput + ?Sized> ByteOutput for Box<T> {
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        (**self).close()
    }
}

impl ByteOutput for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

// ============================================================================
// In-memory adapters
// ============================================================================

/// Byte input over an owned buffer
#[derive(Debug, Clone)]
pub struct ByteArrayInput {
    data: Vec<u8>,
    position: usize,
}

impl ByteArrayInput {
    /// Create an input reading `data` from the start
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl ByteInput for ByteArrayInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn available(&mut self) -> Result<usize, StreamError> {
        Ok(self.remaining())
    }

    fn skip(&mut self, count: u64) -> Result<u64, StreamError> {
        let n = (count.min(self.remaining() as u64)) as usize;
        self.position += n;
        Ok(n as u64)
    }
}

/// Byte output into a buffer that stays reachable after the sink is handed off
///
/// Clones share the same storage, so a test or caller can keep one handle
/// while the codec owns the other.
#[derive(Debug, Clone, Default)]
pub struct SharedByteOutput {
    data: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl SharedByteOutput {
    /// Create an empty shared buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Take the written bytes, leaving the buffer empty
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock())
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `close` has been called on any clone
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl ByteOutput for SharedByteOutput {
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        if *self.closed.lock() {
            return Err(StreamError::Closed);
        }
        self.data.lock().extend_from_slice(buf);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        *self.closed.lock() = true;
        Ok(())
    }
}

// ============================================================================
// std::io adapters
// ============================================================================

/// Byte input over any `std::io::Read`
pub struct ReaderInput<R> {
    inner: Option<R>,
}

impl<R: Read + Send> ReaderInput<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }

    /// Unwrap the reader, if it has not been closed
    pub fn into_inner(self) -> Option<R> {
        self.inner
    }
}

impl<R: Read + Send> ByteInput for ReaderInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let inner = self.inner.as_mut().ok_or(StreamError::Closed)?;
        loop {
            match inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.inner = None;
        Ok(())
    }
}

/// Byte output over any `std::io::Write`
pub struct WriterOutput<W: Write> {
    inner: Option<W>,
}

impl<W: Write + Send> WriterOutput<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    /// Unwrap the writer, if it has not been closed
    pub fn into_inner(mut self) -> Option<W> {
        self.inner.take()
    }
}

impl<W: Write + Send> ByteOutput for WriterOutput<W> {
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        let inner = self.inner.as_mut().ok_or(StreamError::Closed)?;
        inner.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        match self.inner.as_mut() {
            Some(inner) => Ok(inner.flush()?),
            None => Err(StreamError::Closed),
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        if let Some(mut inner) = self.inner.take() {
            inner.flush()?;
        }
        Ok(())
    }
}
