//! Error types for mlsingle.

use std::time::Duration;

use mlsingle_tensor::TensorError;

/// Result type alias for mlsingle.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for single-shot operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Null, closed or malformed handle, descriptor or buffer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failed; the handle or buffer is left as before the call.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The backend cannot satisfy the request (dynamic shape, accelerator,
    /// property, model format).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Another invocation is in flight on this handle.
    #[error("try again: handle is busy")]
    TryAgain,

    /// The caller stopped waiting; the backend result will be discarded.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The backend reported an invocation failure.
    #[error("stream error: {0}")]
    StreamError(String),
}

/// Stable discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    OutOfMemory,
    NotSupported,
    TryAgain,
    TimedOut,
    StreamError,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::OutOfMemory(_) => ErrorCode::OutOfMemory,
            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::TryAgain => ErrorCode::TryAgain,
            Error::TimedOut(_) => ErrorCode::TimedOut,
            Error::StreamError(_) => ErrorCode::StreamError,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn not_supported(msg: impl Into<String>) -> Self {
        Error::NotSupported(msg.into())
    }
}

impl From<TensorError> for Error {
    fn from(e: TensorError) -> Self {
        match e {
            TensorError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            TensorError::OutOfMemory(msg) => Error::OutOfMemory(msg),
        }
    }
}
