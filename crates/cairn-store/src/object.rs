use std::io;
use std::pin::Pin;

use bytes::Bytes;
use cairn_types::ObjectHash;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{StoreError, StoreResult};

/// Boxed async reader over an object's payload.
pub type ContentReader = Pin<Box<dyn AsyncRead + Send>>;

const COMPARE_CHUNK: usize = 64 * 1024;

/// Header of a committed object.
///
/// `StoredObject` is the handle returned by a successful commit and by
/// lookups. It never changes after commit; the payload bytes are read through
/// the store that owns them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Digest of the payload; the object's identity.
    pub hash: ObjectHash,
    /// Payload length in bytes.
    pub length: u64,
    /// Caller-supplied type tag (e.g. `"blob"`).
    #[serde(rename = "type")]
    pub object_type: String,
    /// Opaque caller metadata recorded with the first commit of this digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl StoredObject {
    pub fn new(hash: ObjectHash, object_type: impl Into<String>, length: u64) -> Self {
        Self {
            hash,
            length,
            object_type: object_type.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// What [`ObjectStore::put`](crate::ObjectStore::put) did with an object.
///
/// Decided under the per-digest writer lock, so of any number of concurrent
/// identical puts exactly one reports `Created`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// This call committed the object.
    Created(StoredObject),
    /// An identical object was already committed; carries the stored header.
    Existing(StoredObject),
}

impl PutOutcome {
    pub fn object(&self) -> &StoredObject {
        match self {
            Self::Created(object) | Self::Existing(object) => object,
        }
    }

    pub fn into_object(self) -> StoredObject {
        match self {
            Self::Created(object) | Self::Existing(object) => object,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// A staged payload handed to [`ObjectStore::put`](crate::ObjectStore::put).
///
/// Small payloads stay in memory; large ones are spooled to a temporary file
/// that the filesystem backend can move into place without copying.
#[derive(Debug)]
pub enum Content {
    Memory(Bytes),
    Spooled(NamedTempFile),
}

impl Content {
    /// Payload length in bytes.
    pub fn len(&self) -> io::Result<u64> {
        match self {
            Self::Memory(bytes) => Ok(bytes.len() as u64),
            Self::Spooled(file) => Ok(file.as_file().metadata()?.len()),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Open an independent reader over the staged bytes.
    pub async fn reader(&self) -> io::Result<ContentReader> {
        match self {
            Self::Memory(bytes) => Ok(Box::pin(io::Cursor::new(bytes.clone()))),
            Self::Spooled(file) => {
                let f = tokio::fs::File::open(file.path()).await?;
                Ok(Box::pin(f))
            }
        }
    }

    /// Load the whole payload into memory.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Self::Memory(bytes) => Ok(bytes),
            Self::Spooled(file) => Ok(Bytes::from(tokio::fs::read(file.path()).await?)),
        }
    }
}

impl From<Bytes> for Content {
    fn from(bytes: Bytes) -> Self {
        Self::Memory(bytes)
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Memory(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Content {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Memory(Bytes::from_static(bytes))
    }
}

/// Compare two payload streams byte for byte.
///
/// Returns `false` as soon as a difference is seen or one stream ends early.
pub async fn same_content(mut a: ContentReader, mut b: ContentReader) -> io::Result<bool> {
    let mut buf_a = vec![0u8; COMPARE_CHUNK];
    let mut buf_b = vec![0u8; COMPARE_CHUNK];
    loop {
        let n = a.read(&mut buf_a).await?;
        if n == 0 {
            return Ok(b.read(&mut buf_b[..1]).await? == 0);
        }
        match b.read_exact(&mut buf_b[..n]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        }
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Decide whether a resubmission under an already stored digest is the same
/// object. Type and length are compared first; content only if they agree.
pub(crate) async fn ensure_same_object(
    existing: &StoredObject,
    existing_content: ContentReader,
    incoming: &StoredObject,
    content: &Content,
) -> StoreResult<()> {
    let hash = existing.hash;
    if existing.object_type != incoming.object_type {
        return Err(collision(
            hash,
            format!(
                "stored type {:?}, submitted type {:?}",
                existing.object_type, incoming.object_type
            ),
        ));
    }
    if existing.length != incoming.length {
        return Err(collision(
            hash,
            format!(
                "stored length {}, submitted length {}",
                existing.length, incoming.length
            ),
        ));
    }
    if !same_content(existing_content, content.reader().await?).await? {
        return Err(collision(hash, "stored bytes differ from submitted bytes".into()));
    }
    Ok(())
}

fn collision(hash: ObjectHash, reason: String) -> StoreError {
    tracing::error!(%hash, %reason, "digest already stored with different content");
    StoreError::HashCollisionMismatch { hash, reason }
}

/// Reject staged content whose length disagrees with its header.
pub(crate) fn ensure_length(header: &StoredObject, content: &Content) -> StoreResult<()> {
    let actual = content.len()?;
    if actual != header.length {
        return Err(StoreError::LengthMismatch {
            hash: header.hash,
            declared: header.length,
            actual,
        });
    }
    Ok(())
}
