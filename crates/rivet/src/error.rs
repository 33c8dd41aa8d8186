//! Marshalling error taxonomy

use rivet_io::StreamError;
use thiserror::Error;

/// Boxed cause attached to resolution failures
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while marshalling or unmarshalling an object graph
///
/// None of these are retried internally. A session that reported
/// `StreamCorruption` should be discarded.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// Malformed framing, unknown tag or table index, header mismatch, bad UTF
    #[error("Stream corrupted: {0}")]
    StreamCorruption(String),

    /// A class named by the stream could not be resolved locally
    #[error("Cannot resolve class `{name}`")]
    ClassResolution {
        /// Class name after inbound name transformation
        name: String,
        /// Loader failure, if any
        #[source]
        cause: Option<BoxedCause>,
    },

    /// The admission filter rejected the input or failed while deciding
    #[error("Rejected by unmarshalling filter: {subject} ({reason})")]
    FilterRejection {
        /// What was being checked (class name or a counter description)
        subject: String,
        /// Filter verdict or fault message
        reason: String,
    },

    /// A bounded reader or writer hit its limit
    #[error("Byte limit of {limit} exceeded after {transferred} bytes")]
    ResourceLimitExceeded {
        /// Configured ceiling
        limit: u64,
        /// Bytes that made it through before the cutoff
        transferred: u64,
    },

    /// A typed read found a value of a different type
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Requested type
        expected: String,
        /// Type actually decoded
        actual: String,
    },

    /// The source ran dry in the middle of a value
    #[error("Unexpected end of stream")]
    EndOfStream,

    /// Operation attempted on a marshaller or unmarshaller that is not started
    #[error("Marshaller is not active")]
    NotActive,

    /// The class may not be written by this engine
    #[error("Class `{0}` is not serializable")]
    NotSerializable(String),

    /// A class is unusable for this operation
    #[error("Invalid class `{class}`: {reason}")]
    InvalidClass {
        /// Class name
        class: String,
        /// What is wrong with it
        reason: String,
    },

    /// Cached metadata refers to a class that no longer exists
    #[error("Class `{0}` has been unloaded")]
    ClassUnloaded(String),

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// More than 256 table entries or delegates
    #[error("Table holds {count} entries, at most 256 are addressable")]
    TableOverflow {
        /// Requested entry count
        count: usize,
    },

    /// A user hook failed or misused the stream
    #[error("Hook failed: {0}")]
    Hook(String),

    /// Underlying transport error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MarshalError {
    /// Shorthand for a corruption error
    pub fn corrupt(message: impl Into<String>) -> Self {
        MarshalError::StreamCorruption(message.into())
    }

    /// Shorthand for an invalid-class error
    pub fn invalid_class(class: impl Into<String>, reason: impl Into<String>) -> Self {
        MarshalError::InvalidClass {
            class: class.into(),
            reason: reason.into(),
        }
    }

    /// Whether the stream position is unreliable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MarshalError::StreamCorruption(_)
                | MarshalError::EndOfStream
                | MarshalError::ResourceLimitExceeded { .. }
                | MarshalError::Io(_)
        )
    }
}

impl From<StreamError> for MarshalError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::EndOfStream => MarshalError::EndOfStream,
            StreamError::NotActive | StreamError::Closed => MarshalError::NotActive,
            StreamError::LimitExceeded { limit, transferred } => {
                MarshalError::ResourceLimitExceeded { limit, transferred }
            }
            e @ (StreamError::MalformedUtf { .. } | StreamError::HeaderMismatch { .. }) => {
                MarshalError::StreamCorruption(e.to_string())
            }
            StreamError::UtfTooLong(len) => MarshalError::Hook(format!(
                "string of {len} encoded bytes does not fit a length-prefixed field"
            )),
            StreamError::Io(e) => MarshalError::Io(e),
        }
    }
}

/// Result alias used across the crate
pub type MarshalResult<T> = Result<T, MarshalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_errors_map_onto_taxonomy() {
        let header = StreamError::HeaderMismatch {
            offset: 0,
            expected: 1,
            actual: 2,
        };
        assert!(matches!(MarshalError::from(header), MarshalError::StreamCorruption(_)));

        let limit = StreamError::LimitExceeded {
            limit: 8,
            transferred: 8,
        };
        assert!(matches!(
            MarshalError::from(limit),
            MarshalError::ResourceLimitExceeded {
                limit: 8,
                transferred: 8
            }
        ));
        assert!(matches!(MarshalError::from(StreamError::EndOfStream), MarshalError::EndOfStream));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MarshalError::corrupt("bad tag").is_fatal());
        assert!(!MarshalError::NotSerializable("a.B".into()).is_fatal());
    }
}
