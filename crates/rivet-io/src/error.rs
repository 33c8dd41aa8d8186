//! Codec error types

use thiserror::Error;

/// Errors raised by byte sources, sinks and the buffered codec
#[derive(Debug, Error)]
pub enum StreamError {
    /// A read needed more bytes than the source could deliver
    #[error("Unexpected end of stream")]
    EndOfStream,

    /// I/O attempted while no source or sink is bound
    #[error("Stream is not active")]
    NotActive,

    /// An external byte limit was hit mid-operation
    #[error("Byte limit of {limit} exceeded ({transferred} bytes transferred)")]
    LimitExceeded {
        /// Configured ceiling
        limit: u64,
        /// Bytes that did transfer before the cutoff (never above `limit`)
        transferred: u64,
    },

    /// A modified UTF-8 sequence could not be decoded
    #[error("Malformed UTF sequence at byte {offset}: {reason}")]
    MalformedUtf {
        /// Offset of the offending byte within the string payload
        offset: usize,
        /// What was wrong
        reason: &'static str,
    },

    /// A length-prefixed string would need more than 65535 encoded bytes
    #[error("Encoded string is {0} bytes long, limit is 65535")]
    UtfTooLong(usize),

    /// The configured stream header did not match
    #[error("Stream header mismatch at byte {offset}: expected {expected:#04x}, got {actual:#04x}")]
    HeaderMismatch {
        /// Index into the header
        offset: usize,
        /// Byte the header requires
        expected: u8,
        /// Byte actually read
        actual: u8,
    },

    /// The source or sink has been closed
    #[error("Stream closed")]
    Closed,

    /// Error surfaced by the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Bytes known to have transferred before a limit failure, if any
    pub fn bytes_transferred(&self) -> Option<u64> {
        match self {
            StreamError::LimitExceeded { transferred, .. } => Some(*transferred),
            _ => None,
        }
    }
}
