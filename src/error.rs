//! Error types for FlashDB.
//!
//! Read-path absence (a missing or expired key) is never an error; it shows
//! up as `None`, `false` or an omitted map entry. Only mutations that need
//! the key to already exist raise [`Error::KeyNotFound`].

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Database`](crate::Database) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation requires the key to exist (and be live)
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Empty key, bad page arguments, TTL overflow, ...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The database handle has been closed
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O failure in the record log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record log failed validation
    #[error("corrupted log at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },

    /// A value or log frame could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A stored value or log frame could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Returns `true` for failures of the storage layer itself (I/O,
    /// corruption, codec), as opposed to caller mistakes.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Corrupted { .. } | Error::Encode(_) | Error::Decode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failure_classification() {
        assert!(Error::Io(std::io::Error::other("disk full")).is_storage_failure());
        assert!(Error::Corrupted {
            offset: 8,
            reason: "bad crc".into()
        }
        .is_storage_failure());
        assert!(!Error::KeyNotFound("k".into()).is_storage_failure());
        assert!(!Error::ConnectionClosed.is_storage_failure());
        assert!(!Error::invalid("empty key").is_storage_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::KeyNotFound("user:1".into()).to_string(),
            "key not found: user:1"
        );
        assert_eq!(Error::ConnectionClosed.to_string(), "connection closed");
    }
}
