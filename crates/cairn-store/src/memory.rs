use std::collections::HashMap;
use std::io;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use cairn_types::ObjectHash;

use crate::error::{StoreError, StoreResult};
use crate::locks::KeyedLocks;
use crate::object::{
    ensure_length, ensure_same_object, Content, ContentReader, PutOutcome, StoredObject,
};
use crate::traits::ObjectStore;

struct Entry {
    header: StoredObject,
    bytes: Bytes,
}

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock`;
/// commits for one digest are serialized through a [`KeyedLocks`] arena so
/// the consistency check and the insert form one decision.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectHash, Entry>>,
    writers: KeyedLocks<ObjectHash>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            writers: KeyedLocks::new(),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.header.length)
            .sum()
    }

    /// Return a sorted list of all stored hashes.
    pub fn all_hashes(&self) -> Vec<ObjectHash> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut hashes: Vec<ObjectHash> = map.keys().copied().collect();
        hashes.sort();
        hashes
    }

    fn lookup(&self, hash: &ObjectHash) -> Option<(StoredObject, Bytes)> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        map.get(hash).map(|e| (e.header.clone(), e.bytes.clone()))
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, header: StoredObject, content: Content) -> StoreResult<PutOutcome> {
        ensure_length(&header, &content)?;
        let _writer = self.writers.lock(&header.hash).await;

        if let Some((existing, bytes)) = self.lookup(&header.hash) {
            ensure_same_object(&existing, Box::pin(io::Cursor::new(bytes)), &header, &content)
                .await?;
            tracing::debug!(hash = %header.hash, "object already stored");
            return Ok(PutOutcome::Existing(existing));
        }

        let bytes = content.into_bytes().await?;
        let mut map = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(
            header.hash,
            Entry {
                header: header.clone(),
                bytes,
            },
        );
        Ok(PutOutcome::Created(header))
    }

    async fn get(&self, hash: &ObjectHash) -> StoreResult<StoredObject> {
        self.lookup(hash)
            .map(|(header, _)| header)
            .ok_or(StoreError::NotFound(*hash))
    }

    async fn contains(&self, hash: &ObjectHash) -> StoreResult<bool> {
        let map = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.contains_key(hash))
    }

    async fn open_content(&self, hash: &ObjectHash) -> StoreResult<ContentReader> {
        let (_, bytes) = self.lookup(hash).ok_or(StoreError::NotFound(*hash))?;
        Ok(Box::pin(io::Cursor::new(bytes)))
    }

    async fn read_content(&self, hash: &ObjectHash) -> StoreResult<Bytes> {
        self.lookup(hash)
            .map(|(_, bytes)| bytes)
            .ok_or(StoreError::NotFound(*hash))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .finish()
    }
}
