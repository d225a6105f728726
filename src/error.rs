//! Error types for the SwayKV storage engine.

use std::io;

/// The result type used throughout SwayKV.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for SwayKV operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption was detected in a log, segment or appendix.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A file or directory the database needs was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The database is in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// The database directory already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A function apply was resolved against an id that was never registered
    /// on this handle.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// The handle was closed.
    #[error("Database closed")]
    Closed,

    /// One operation of a batch failed its precondition, so nothing in the
    /// batch was applied.
    #[error("Batch aborted at operation {index}: {reason}")]
    BatchAborted {
        /// Position of the offending operation.
        index: usize,
        /// Why it was rejected.
        reason: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Creates a function-not-found error for a raw function id.
    pub fn function_not_found(id: &[u8]) -> Self {
        Error::FunctionNotFound(String::from_utf8_lossy(id).into_owned())
    }

    /// Returns true if this error reports damaged persisted data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::ChecksumMismatch { .. })
    }

    /// Returns true if the operation failed because the handle was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Returns true for I/O failures caused by running out of file handles.
    pub(crate) fn is_handle_exhaustion(&self) -> bool {
        match self {
            // EMFILE / ENFILE
            Error::Io(e) => matches!(e.raw_os_error(), Some(23) | Some(24)),
            _ => false,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
