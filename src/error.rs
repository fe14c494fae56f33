//! Error types for the fanout buffer and its reader handles.

use std::io;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FanoutError>;

#[derive(Debug, Clone, Error)]
pub enum FanoutError {
    /// Operation attempted in the wrong lifecycle phase
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Malformed read parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The source stream failed. Shared by every reader that observes it.
    #[error("Source stream failed: {0}")]
    Source(#[source] Arc<io::Error>),

    /// The reader handle or the fanout itself has been closed
    #[error("{0}")]
    Closed(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FanoutError {
    /// The underlying I/O error, if this is a source failure.
    pub fn source_error(&self) -> Option<&io::Error> {
        match self {
            FanoutError::Source(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            FanoutError::InvalidState(_) => io::ErrorKind::Other,
            FanoutError::InvalidArgument(_) | FanoutError::Config(_) => {
                io::ErrorKind::InvalidInput
            }
            FanoutError::Source(err) => err.kind(),
            FanoutError::Closed(_) => io::ErrorKind::BrokenPipe,
        }
    }
}

impl From<FanoutError> for io::Error {
    fn from(err: FanoutError) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_source_error_keeps_kind_and_cause() {
        let original = io::Error::new(io::ErrorKind::TimedOut, "Test exception");
        let err = FanoutError::Source(Arc::new(original));

        assert_eq!(err.source_error().unwrap().kind(), io::ErrorKind::TimedOut);
        assert_eq!(err.source().unwrap().to_string(), "Test exception");

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);

        let inner = io_err
            .get_ref()
            .and_then(|e| e.downcast_ref::<FanoutError>())
            .expect("FanoutError should be the inner error");
        assert!(matches!(inner, FanoutError::Source(_)));
    }

    #[test]
    fn test_io_error_kinds() {
        let closed: io::Error = FanoutError::Closed("Stream closed").into();
        assert_eq!(closed.kind(), io::ErrorKind::BrokenPipe);

        let invalid: io::Error = FanoutError::InvalidArgument("bad".into()).into();
        assert_eq!(invalid.kind(), io::ErrorKind::InvalidInput);
    }
}
