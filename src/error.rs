//! Error types for the OCI driver.

use std::panic::Location;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for driver operations.
///
/// Errors are `Clone` so that the independently fallible fields of an
/// [`ExecResult`](crate::ExecResult) can be read more than once.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Error reported by the native engine through the error handle.
    ///
    /// Allocation failures and cancellation (an injected break) surface
    /// through this variant as well.
    #[error("ORA-{code:05}: {message}")]
    Oracle { code: u32, message: String },

    /// A native call failed without leaving a record on the error handle.
    #[error("native call failed with status {status}")]
    NativeStatus { status: i32 },

    /// Encoding or decoding of a bind value failed.
    #[error("binary read for column {index} - error: {message}")]
    Marshal { index: usize, message: String },

    /// Type conversion error.
    #[error("Type conversion error: {message}")]
    TypeConversion { message: String },

    /// Operation on a closed statement.
    #[error("Statement is closed")]
    StatementClosed,

    /// Operation on closed rows.
    #[error("Rows are closed")]
    RowsClosed,

    /// Row iteration was interrupted by the caller's cancellation.
    #[error("Row iteration cancelled")]
    Cancelled,

    /// Column index out of bounds.
    #[error("Column index {index} out of bounds (columns: {count})")]
    ColumnIndexOutOfBounds { index: usize, count: usize },

    /// Buffer too small.
    #[error("Buffer too small: need {needed} bytes, have {available} (raised at {location})")]
    BufferTooSmall {
        needed: usize,
        available: usize,
        location: &'static Location<'static>,
    },

    /// Invalid connection option string.
    #[error("Invalid connection option: {message}")]
    InvalidConfig { message: String },

    /// The blocking task running a native call panicked or was aborted.
    #[error("Native call task failed: {message}")]
    Task { message: String },
}

impl Error {
    /// Create an Oracle database error.
    pub fn oracle(code: u32, message: impl Into<String>) -> Self {
        Self::Oracle {
            code,
            message: message.into(),
        }
    }

    /// Create a marshaling error for the argument or column at `index`.
    pub fn marshal(index: usize, message: impl Into<String>) -> Self {
        Self::Marshal {
            index,
            message: message.into(),
        }
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a buffer-too-small error tagged with the caller's location.
    #[track_caller]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Self::BufferTooSmall {
            needed,
            available,
            location: Location::caller(),
        }
    }

    /// The native error code, if this error came from the engine.
    pub fn code(&self) -> Option<u32> {
        match self {
            Error::Oracle { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task {
            message: err.to_string(),
        }
    }
}
