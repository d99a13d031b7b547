use std::fmt;

use cairn_index::IndexError;
use cairn_store::StoreError;
use cairn_types::ObjectHash;

/// Why an ingestion or lookup was refused.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed metadata, declared hash, or truncated body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Declared or observed length above the allowed maximum.
    #[error("object size {length} exceeds limit {limit}")]
    SizeExceeded { limit: u64, length: u64 },

    /// The body does not hash to the declared digest.
    #[error("hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        declared: ObjectHash,
        computed: ObjectHash,
    },

    /// The digest is already stored with different content.
    #[error("hash collision for {hash}: {reason}")]
    HashCollisionMismatch { hash: ObjectHash, reason: String },

    /// The caller went away or the ingest timeout elapsed before storing.
    #[error("ingestion cancelled: {0}")]
    Cancelled(String),

    /// The referenced object is not in the store.
    #[error("unknown object: {0}")]
    UnknownObject(ObjectHash),

    /// Durability fault in the object store.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Fault in the relation index.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Staging the body to a spool file failed.
    #[error("spool error: {0}")]
    Spool(#[source] std::io::Error),
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::HashCollisionMismatch { hash, reason } => {
                Self::HashCollisionMismatch { hash, reason }
            }
            StoreError::NotFound(hash) => Self::UnknownObject(hash),
            other => Self::Store(other),
        }
    }
}

/// Coarse classification of an [`IngestError`], used for status mapping
/// and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    BadRequest,
    SizeExceeded,
    HashMismatch,
    HashCollisionMismatch,
    Cancelled,
    NotFound,
    StoreError,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::SizeExceeded => "size_exceeded",
            Self::HashMismatch => "hash_mismatch",
            Self::HashCollisionMismatch => "hash_collision_mismatch",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::StoreError => "store_error",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IngestError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Self::BadRequest(_) => RejectionKind::BadRequest,
            Self::SizeExceeded { .. } => RejectionKind::SizeExceeded,
            Self::HashMismatch { .. } => RejectionKind::HashMismatch,
            Self::HashCollisionMismatch { .. } => RejectionKind::HashCollisionMismatch,
            Self::Cancelled(_) => RejectionKind::Cancelled,
            Self::UnknownObject(_) => RejectionKind::NotFound,
            Self::Store(_) | Self::Index(_) | Self::Spool(_) => RejectionKind::StoreError,
        }
    }

    /// Only cancellation is safe to retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result alias for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;
