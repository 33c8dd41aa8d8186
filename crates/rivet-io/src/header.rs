//! Stream headers written before any payload

use crate::error::StreamError;
use crate::input::DataInput;
use crate::output::DataOutput;

/// A fixed preamble written before and verified before any payload
pub trait StreamHeader: Send + Sync {
    /// Emit the header
    fn write_header(&self, output: &mut DataOutput) -> Result<(), StreamError>;

    /// Consume and verify the header
    fn read_header(&self, input: &mut DataInput) -> Result<(), StreamError>;
}

/// Header consisting of a constant byte string, checked byte for byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticStreamHeader {
    bytes: Vec<u8>,
}

impl StaticStreamHeader {
    /// Header made of `bytes`
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The header bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl StreamHeader for StaticStreamHeader {
    fn write_header(&self, output: &mut DataOutput) -> Result<(), StreamError> {
        output.write_bytes(&self.bytes)
    }

    fn read_header(&self, input: &mut DataInput) -> Result<(), StreamError> {
        for (offset, &expected) in self.bytes.iter().enumerate() {
            let actual = input.read_u8()?;
            if actual != expected {
                return Err(StreamError::HeaderMismatch {
                    offset,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}
