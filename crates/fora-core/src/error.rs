//! Error types for the Fora native ABI

use thiserror::Error;

/// Status word returned by generated code when an operation succeeds.
pub const STATUS_OK: i64 = 0;

pub const STATUS_INVALID_ARGUMENT: i64 = 1;
pub const STATUS_INDEX_OUT_OF_RANGE: i64 = 2;
pub const STATUS_OUT_OF_MEMORY: i64 = 3;

/// Main error type for ABI operations.
///
/// Host operations and compiled entries report the same values: the compiled
/// path rebuilds the exact error the direct path would have produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    /// Malformed size or index at the API boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Access beyond the current logical count.
    #[error("index {index} out of range for count {count}")]
    IndexOutOfRange { index: i64, count: usize },

    /// Allocation failed while growing.
    #[error("out of memory while growing to {requested} slots")]
    OutOfMemory { requested: usize },

    /// Operation shape that cannot be represented in the native calling convention.
    #[error("unsupported native expression: {0}")]
    UnsupportedExpression(String),

    /// Byte block could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl AbiError {
    /// Returns the kind of this error, dropping its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AbiError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AbiError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            AbiError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            AbiError::UnsupportedExpression(_) => ErrorKind::UnsupportedExpression,
            AbiError::Codec(_) => ErrorKind::Codec,
        }
    }
}

/// Payload-free error classification.
///
/// Only the runtime kinds have a status word; the others never cross into
/// generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    IndexOutOfRange,
    OutOfMemory,
    UnsupportedExpression,
    Codec,
}

impl ErrorKind {
    /// Status word generated code returns for this kind, if it has one.
    pub fn status(self) -> Option<i64> {
        match self {
            ErrorKind::InvalidArgument => Some(STATUS_INVALID_ARGUMENT),
            ErrorKind::IndexOutOfRange => Some(STATUS_INDEX_OUT_OF_RANGE),
            ErrorKind::OutOfMemory => Some(STATUS_OUT_OF_MEMORY),
            ErrorKind::UnsupportedExpression | ErrorKind::Codec => None,
        }
    }

    /// Decodes a non-zero status word.
    pub fn from_status(status: i64) -> Option<ErrorKind> {
        match status {
            STATUS_INVALID_ARGUMENT => Some(ErrorKind::InvalidArgument),
            STATUS_INDEX_OUT_OF_RANGE => Some(ErrorKind::IndexOutOfRange),
            STATUS_OUT_OF_MEMORY => Some(ErrorKind::OutOfMemory),
            _ => None,
        }
    }
}

/// Result type alias for ABI operations
pub type Result<T> = std::result::Result<T, AbiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kinds_round_trip_through_status() {
        for kind in [
            ErrorKind::InvalidArgument,
            ErrorKind::IndexOutOfRange,
            ErrorKind::OutOfMemory,
        ] {
            let status = kind.status().unwrap();
            assert_ne!(status, STATUS_OK);
            assert_eq!(ErrorKind::from_status(status), Some(kind));
        }
    }

    #[test]
    fn test_static_kinds_have_no_status() {
        assert_eq!(ErrorKind::UnsupportedExpression.status(), None);
        assert_eq!(ErrorKind::Codec.status(), None);
        assert_eq!(ErrorKind::from_status(STATUS_OK), None);
        assert_eq!(ErrorKind::from_status(99), None);
    }

    #[test]
    fn test_display() {
        let err = AbiError::IndexOutOfRange {
            index: 7,
            count: 3,
        };
        assert_eq!(err.to_string(), "index 7 out of range for count 3");
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
    }
}
