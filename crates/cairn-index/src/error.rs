use thiserror::Error;

/// Errors from relation index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// I/O error from the relation log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A relation record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The relation log is damaged before its final record, so replaying
    /// past that point or appending to it would lose edges.
    #[error("relation log corrupt at offset {offset}: {reason}")]
    CorruptLog { offset: u64, reason: String },

    /// An internal lock was poisoned by a panicking writer.
    #[error("index lock poisoned: {0}")]
    Poisoned(String),
}

/// Convenience alias used throughout the crate.
pub type IndexResult<T> = std::result::Result<T, IndexError>;
