//! Byte-limited wrappers
//!
//! [`LimitedByteOutput`] refuses to pass more than its limit to the inner
//! sink: the write that crosses the limit transfers the bytes that still fit
//! and then fails with [`StreamError::LimitExceeded`] carrying the exact
//! count. [`LimitedByteInput`] presents end-of-input once its limit is
//! consumed.

use crate::byte_io::{ByteInput, ByteOutput};
use crate::error::StreamError;

/// Sink wrapper that caps the number of bytes written
pub struct LimitedByteOutput<O> {
    inner: O,
    limit: u64,
    written: u64,
}

impl<O: ByteOutput> LimitedByteOutput<O> {
    /// Wrap `inner`, allowing at most `limit` bytes through
    pub fn new(inner: O, limit: u64) -> Self {
        Self {
            inner,
            limit,
            written: 0,
        }
    }

    /// Bytes passed to the inner sink so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Bytes still allowed
    pub fn remaining(&self) -> u64 {
        self.limit - self.written
    }

    /// Unwrap the inner sink
    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: ByteOutput> ByteOutput for LimitedByteOutput<O> {
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        let remaining = self.remaining();
        if buf.len() as u64 <= remaining {
            self.inner.write(buf)?;
            self.written += buf.len() as u64;
            return Ok(());
        }
        let fits = remaining as usize;
        if fits > 0 {
            self.inner.write(&buf[..fits])?;
            self.written += fits as u64;
        }
        Err(StreamError::LimitExceeded {
            limit: self.limit,
            transferred: self.written,
        })
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.inner.close()
    }
}

/// Source wrapper that ends after a fixed number of bytes
pub struct LimitedByteInput<I> {
    inner: I,
    remaining: u64,
}

impl<I: ByteInput> LimitedByteInput<I> {
    /// Wrap `inner`, exposing at most `limit` bytes
    pub fn new(inner: I, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// Bytes still readable before the limit
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Unwrap the inner source
    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I: ByteInput> ByteInput for LimitedByteInput<I> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.remaining -= n as u64;
        Ok(n)
    }

    fn available(&mut self) -> Result<usize, StreamError> {
        Ok((self.inner.available()? as u64).min(self.remaining) as usize)
    }

    fn skip(&mut self, count: u64) -> Result<u64, StreamError> {
        let n = self.inner.skip(count.min(self.remaining))?;
        self.remaining -= n;
        Ok(n)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.inner.close()
    }
}
