use async_trait::async_trait;
use bytes::Bytes;
use cairn_types::ObjectHash;
use tokio::io::AsyncReadExt;

use crate::error::StoreResult;
use crate::object::{Content, ContentReader, PutOutcome, StoredObject};

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - At most one object per digest. Objects are immutable once committed.
/// - `put` is idempotent: re-submitting an identical object returns the
///   existing header as `PutOutcome::Existing`; submitting different content, length or type under a
///   stored digest fails with `HashCollisionMismatch` and never overwrites.
/// - At most one writer per digest: concurrent `put`s for the same hash
///   serialize, and the later one observes the earlier one's commit.
/// - Commits are atomic: a partially written object is never visible to `get`.
/// - Reads are always safe concurrently with each other and with writes of
///   other digests.
/// - The store never interprets payload bytes and never recomputes digests;
///   verifying content against its hash is the caller's job.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Commit `content` under `header.hash`.
    ///
    /// The staged content must be exactly `header.length` bytes long. The
    /// outcome says whether this call wrote the object or found it stored.
    async fn put(&self, header: StoredObject, content: Content) -> StoreResult<PutOutcome>;

    /// Look up an object header. Fails with `NotFound` if absent.
    async fn get(&self, hash: &ObjectHash) -> StoreResult<StoredObject>;

    /// Check whether an object is committed.
    async fn contains(&self, hash: &ObjectHash) -> StoreResult<bool>;

    /// Open a reader over a committed object's payload.
    async fn open_content(&self, hash: &ObjectHash) -> StoreResult<ContentReader>;

    /// Read a committed object's whole payload into memory.
    async fn read_content(&self, hash: &ObjectHash) -> StoreResult<Bytes> {
        let header = self.get(hash).await?;
        let mut reader = self.open_content(hash).await?;
        let mut buf = Vec::with_capacity(header.length as usize);
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
