use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cairn_types::ObjectHash;
use tokio::io::AsyncWriteExt;

use crate::error::{StoreError, StoreResult};
use crate::locks::KeyedLocks;
use crate::object::{
    ensure_length, ensure_same_object, Content, ContentReader, PutOutcome, StoredObject,
};
use crate::traits::ObjectStore;

/// Filesystem-backed object store.
///
/// Layout under the root directory:
///
/// ```text
/// root/
/// └── objects/
///     └── {hash[0..2]}/
///         ├── {hash[2..]}        ← payload bytes
///         └── {hash[2..]}.json   ← StoredObject header
/// ```
///
/// The payload is moved into place first and the header last, both through a
/// temporary file and a rename. An object exists exactly when its header file
/// exists, so readers never observe a half-written object.
pub struct FsObjectStore {
    root: PathBuf,
    writers: KeyedLocks<ObjectHash>,
}

impl FsObjectStore {
    /// Open (or create) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("objects")).await?;
        tracing::debug!(root = %root.display(), "opened filesystem object store");
        Ok(Self {
            root,
            writers: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn payload_path(&self, hash: &ObjectHash) -> PathBuf {
        let (prefix, rest) = hash.fanout();
        self.root.join("objects").join(prefix).join(rest)
    }

    fn header_path(&self, hash: &ObjectHash) -> PathBuf {
        let (prefix, rest) = hash.fanout();
        self.root
            .join("objects")
            .join(prefix)
            .join(format!("{rest}.json"))
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::now_v7()))
    }

    async fn read_header(&self, hash: &ObjectHash) -> StoreResult<Option<StoredObject>> {
        let raw = match tokio::fs::read(self.header_path(hash)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let header: StoredObject =
            serde_json::from_slice(&raw).map_err(|e| StoreError::CorruptObject {
                hash: *hash,
                reason: format!("unreadable header: {e}"),
            })?;
        if header.hash != *hash {
            return Err(StoreError::CorruptObject {
                hash: *hash,
                reason: format!("header names {}", header.hash),
            });
        }
        Ok(Some(header))
    }

    /// Write `data` to a sibling temp file, sync it, and rename over `target`.
    async fn write_atomic(&self, target: &Path, data: &[u8]) -> StoreResult<()> {
        let temp = self.temp_path(target);
        let result = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp, target).await
        }
        .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        Ok(result?)
    }

    /// Copy `source` to a sibling temp file of `target`, sync it, and rename
    /// it into place. The temp file is removed if any step fails.
    async fn copy_atomic(&self, source: &Path, target: &Path) -> StoreResult<()> {
        let temp = self.temp_path(target);
        let result = async {
            tokio::fs::copy(source, &temp).await?;
            tokio::fs::File::open(&temp).await?.sync_all().await?;
            tokio::fs::rename(&temp, target).await
        }
        .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        Ok(result?)
    }

    async fn persist_payload(&self, target: &Path, content: Content) -> StoreResult<()> {
        match content {
            Content::Memory(bytes) => self.write_atomic(target, &bytes).await,
            Content::Spooled(spooled) => {
                let target_owned = target.to_path_buf();
                let persisted = tokio::task::spawn_blocking(move || {
                    spooled.persist(&target_owned).map(|file| file.sync_all())
                })
                .await
                .map_err(|e| StoreError::Io(io::Error::other(e)))?;
                match persisted {
                    Ok(synced) => Ok(synced?),
                    Err(e) => {
                        // Spool directory on another filesystem: copy instead.
                        tracing::debug!(error = %e.error, "rename failed, copying spooled payload");
                        self.copy_atomic(e.file.path(), target).await
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, header: StoredObject, content: Content) -> StoreResult<PutOutcome> {
        ensure_length(&header, &content)?;
        let hash = header.hash;
        let _writer = self.writers.lock(&hash).await;

        if let Some(existing) = self.read_header(&hash).await? {
            let stored = tokio::fs::File::open(self.payload_path(&hash)).await?;
            ensure_same_object(&existing, Box::pin(stored), &header, &content).await?;
            tracing::debug!(%hash, "object already stored");
            return Ok(PutOutcome::Existing(existing));
        }

        let payload = self.payload_path(&hash);
        if let Some(dir) = payload.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        self.persist_payload(&payload, content).await?;

        let encoded =
            serde_json::to_vec_pretty(&header).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_atomic(&self.header_path(&hash), &encoded).await?;
        Ok(PutOutcome::Created(header))
    }

    async fn get(&self, hash: &ObjectHash) -> StoreResult<StoredObject> {
        self.read_header(hash).await?.ok_or(StoreError::NotFound(*hash))
    }

    async fn contains(&self, hash: &ObjectHash) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.header_path(hash)).await?)
    }

    async fn open_content(&self, hash: &ObjectHash) -> StoreResult<ContentReader> {
        if !self.contains(hash).await? {
            return Err(StoreError::NotFound(*hash));
        }
        let file = tokio::fs::File::open(self.payload_path(hash)).await?;
        Ok(Box::pin(file))
    }

    fn backend(&self) -> &'static str {
        "filesystem"
    }
}

impl std::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsObjectStore")
            .field("root", &self.root)
            .finish()
    }
}
