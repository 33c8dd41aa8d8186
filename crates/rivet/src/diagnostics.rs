//! Diagnostic sink for errors unwinding through a session

use crate::error::MarshalError;
use std::fmt;

/// Where in the graph an error passed through
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Class of the object being processed
    pub class: Option<String>,
    /// Field being processed, if any
    pub field: Option<String>,
    /// Array index being processed, if any
    pub index: Option<usize>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class.as_deref().unwrap_or("<stream>"))?;
        if let Some(field) = &self.field {
            write!(f, ".{field}")?;
        }
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

/// Notified once per traversal level while an error unwinds
///
/// Listeners observe only; the error reaches the caller unchanged.
pub trait ExceptionListener: Send + Sync {
    /// An error unwound through `context` while writing
    fn marshalling_error(&self, _error: &MarshalError, _context: &ErrorContext) {}

    /// An error unwound through `context` while reading
    fn unmarshalling_error(&self, _error: &MarshalError, _context: &ErrorContext) {}
}

/// Listener that logs each notification at debug level
#[derive(Debug, Copy, Clone, Default)]
pub struct LoggingExceptionListener;

impl ExceptionListener for LoggingExceptionListener {
    fn marshalling_error(&self, error: &MarshalError, context: &ErrorContext) {
        log::debug!("marshalling failed in {}: {}", context, error);
    }

    fn unmarshalling_error(&self, error: &MarshalError, context: &ErrorContext) {
        log::debug!("unmarshalling failed in {}: {}", context, error);
    }
}
