use std::path::PathBuf;

use crate::chunk::Address;

/// A specialized error type for journal operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Create was invoked on a path that already exists.
    #[error("journal file already exists: {0}")]
    AlreadyExists(PathBuf),
    /// The journal path points at a directory.
    #[error("expected journal file, found directory: {0}")]
    IsDirectory(PathBuf),
    /// An encoded record does not fit the write buffer.
    #[error("record length {length} exceeds write buffer capacity {capacity}")]
    OversizeRecord { length: usize, capacity: usize },
    /// A record could not be parsed or failed its checksum.
    #[error("corrupt journal record: {0}")]
    CorruptRecord(String),
    /// A looked-up record carries a different address than the key.
    #[error("chunk record address does not match ({requested} != {found})")]
    AddressMismatch { requested: Address, found: Address },
    /// Replay encountered a validated record with an unrecognized kind tag.
    #[error("unknown journal record kind ({0})")]
    UnknownRecordKind(u8),
    /// Operation invoked after the journal was closed.
    #[error("journal is closed")]
    Closed,
}

impl JournalError {
    /// Create a corrupt-record error from a displayable value.
    pub fn corrupt<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        Self::CorruptRecord(msg.to_string())
    }
}

/// A Result type alias for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_helper() {
        let err = JournalError::corrupt("bad length");
        assert!(matches!(err, JournalError::CorruptRecord(msg) if msg == "bad length"));
    }
}
