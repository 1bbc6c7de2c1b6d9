//! Error types for tensor descriptors and buffers.

use thiserror::Error;

/// Result type alias for tensor operations.
pub type Result<T> = std::result::Result<T, TensorError>;

/// Errors returned by descriptor and buffer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("tensor: invalid argument: {0}")]
    InvalidArgument(String),

    #[error("tensor: out of memory: {0}")]
    OutOfMemory(String),
}

impl TensorError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        TensorError::InvalidArgument(msg.into())
    }
}
