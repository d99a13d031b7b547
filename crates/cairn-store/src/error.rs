use cairn_types::ObjectHash;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectHash),

    /// The digest is already stored with different content, length or type.
    #[error("hash collision for {hash}: {reason}")]
    HashCollisionMismatch { hash: ObjectHash, reason: String },

    /// The staged content does not have the length the header declares.
    #[error("length mismatch for {hash}: header says {declared}, content has {actual}")]
    LengthMismatch {
        hash: ObjectHash,
        declared: u64,
        actual: u64,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data is malformed or does not belong to the requested hash.
    #[error("corrupt object {hash}: {reason}")]
    CorruptObject { hash: ObjectHash, reason: String },
}

impl StoreError {
    /// Returns `true` for the integrity fault where one digest maps to two contents.
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::HashCollisionMismatch { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
