use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cairn_crypto::{verify_digest, StreamingHash};
use cairn_index::{Children, InMemoryRelationIndex, RelationIndex};
use cairn_store::{Content, ContentReader, InMemoryObjectStore, ObjectStore, StoredObject};
use cairn_types::ObjectHash;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::guard::{BoundedStream, SizeGuard};
use crate::metadata::{IngestRequest, UploadMetadata};
use crate::spool::Spool;

// ---------------------------------------------------------------------------
// IngestState
// ---------------------------------------------------------------------------

/// Where an upload is in the ingestion state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IngestState {
    Received,
    Validating,
    Hashing,
    Storing,
    Linking,
    Committed,
    Rejected,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Hashing => "hashing",
            Self::Storing => "storing",
            Self::Linking => "linking",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time spent in one state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageTiming {
    pub state: IngestState,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// IngestReceipt
// ---------------------------------------------------------------------------

/// The outcome of a committed upload.
#[derive(Clone, Debug)]
pub struct IngestReceipt {
    /// The committed object. For a resubmission this is the header stored
    /// by the first commit.
    pub object: StoredObject,
    /// An identical object was already committed, so this upload wrote nothing.
    pub deduplicated: bool,
    /// Parent the object was linked under, if linking succeeded.
    pub linked_parent: Option<ObjectHash>,
    /// Why linking failed, if it did. The object is committed regardless.
    pub link_error: Option<String>,
    /// Per-state timings in the order the states ran.
    pub stage_timings: Vec<StageTiming>,
    /// Total wall-clock time for the upload.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// IngestPipeline
// ---------------------------------------------------------------------------

/// Drives uploads from metadata to a committed, linked object.
///
/// Every upload is independent; the only mutual exclusion is the per-hash
/// lock inside the object store, which is taken only once the body has been
/// fully received and verified.
pub struct IngestPipeline {
    config: IngestConfig,
    guard: SizeGuard,
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn RelationIndex>,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn RelationIndex>,
    ) -> Self {
        let guard = SizeGuard::new(config.max_object_size);
        Self {
            config,
            guard,
            store,
            index,
        }
    }

    /// A pipeline over fresh in-memory store and index.
    pub fn in_memory(config: IngestConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryRelationIndex::new()),
        )
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn guard(&self) -> SizeGuard {
        self.guard
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn RelationIndex> {
        &self.index
    }

    /// Validate metadata without reading a body.
    pub fn validate(&self, metadata: &UploadMetadata) -> IngestResult<IngestRequest> {
        metadata.validate(&self.guard)
    }

    /// Parse JSON metadata and ingest `body` under it.
    pub async fn ingest_json<S>(&self, raw_metadata: &[u8], body: S) -> IngestResult<IngestReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let metadata = UploadMetadata::from_json(raw_metadata)
            .map_err(|e| reject(IngestState::Received, None, e))?;
        self.ingest(metadata, body).await
    }

    /// Ingest `body` under `metadata`, subject to the configured timeout.
    pub async fn ingest<S>(&self, metadata: UploadMetadata, body: S) -> IngestResult<IngestReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        self.ingest_with_cancel(metadata, body, CancellationToken::new())
            .await
    }

    /// Ingest `body` under `metadata`.
    ///
    /// Cancelling `cancel`, or running past the ingest timeout, while the
    /// upload is validating or hashing rejects it with
    /// [`IngestError::Cancelled`] and drops the body stream. Nothing reaches
    /// the store in that case. Once Storing starts the commit runs to
    /// completion regardless of `cancel`.
    pub async fn ingest_with_cancel<S>(
        &self,
        metadata: UploadMetadata,
        body: S,
        cancel: CancellationToken,
    ) -> IngestResult<IngestReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let started = Instant::now();
        let mut timings = Vec::with_capacity(4);

        // Validating
        let stage = Instant::now();
        debug!(declared = %metadata.content_hash, state = %IngestState::Validating, "ingest state");
        let request = self
            .validate(&metadata)
            .map_err(|e| reject(IngestState::Validating, None, e))?;
        if cancel.is_cancelled() {
            return Err(reject(
                IngestState::Validating,
                Some(&request.declared_hash),
                IngestError::Cancelled("caller cancelled".into()),
            ));
        }
        timings.push(StageTiming {
            state: IngestState::Validating,
            elapsed: stage.elapsed(),
        });
        let hash = request.declared_hash;

        // Hashing
        let stage = Instant::now();
        debug!(%hash, state = %IngestState::Hashing, length = request.declared_length, "ingest state");
        let timeout = self.config.ingest_timeout;
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit.saturating_sub(started.elapsed())).await,
                None => std::future::pending::<()>().await,
            }
        };
        let hashed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled("caller cancelled".into())),
            _ = deadline => Err(IngestError::Cancelled(format!(
                "ingest timeout of {:?} elapsed",
                timeout.unwrap_or_default()
            ))),
            result = self.receive(&request, body) => result,
        };
        let content = hashed.map_err(|e| reject(IngestState::Hashing, Some(&hash), e))?;
        timings.push(StageTiming {
            state: IngestState::Hashing,
            elapsed: stage.elapsed(),
        });

        // Storing
        let stage = Instant::now();
        debug!(%hash, state = %IngestState::Storing, "ingest state");
        let mut header = StoredObject::new(hash, request.object_type.clone(), request.declared_length);
        header.metadata = request.metadata.clone();
        let outcome = self
            .store
            .put(header, content)
            .await
            .map_err(|e| reject(IngestState::Storing, Some(&hash), e.into()))?;
        let deduplicated = !outcome.is_created();
        let object = outcome.into_object();
        timings.push(StageTiming {
            state: IngestState::Storing,
            elapsed: stage.elapsed(),
        });
        info!(
            %hash,
            length = object.length,
            object_type = %object.object_type,
            deduplicated,
            backend = self.store.backend(),
            "object committed"
        );

        // Linking
        let mut linked_parent = None;
        let mut link_error = None;
        if let Some(parent) = request.parent {
            let stage = Instant::now();
            debug!(%hash, %parent, state = %IngestState::Linking, "ingest state");
            match self.link_edge(parent, hash).await {
                Ok(_) => linked_parent = Some(parent),
                Err(e) => {
                    warn!(%hash, %parent, error = %e, "linking failed; object stays committed");
                    link_error = Some(e.to_string());
                }
            }
            timings.push(StageTiming {
                state: IngestState::Linking,
                elapsed: stage.elapsed(),
            });
        }

        debug!(%hash, state = %IngestState::Committed, "ingest state");
        Ok(IngestReceipt {
            object,
            deduplicated,
            linked_parent,
            link_error,
            stage_timings: timings,
            elapsed: started.elapsed(),
        })
    }

    /// Stream the body through the size bound and the hasher into a spool,
    /// then compare digests.
    async fn receive<S>(&self, request: &IngestRequest, body: S) -> IngestResult<Content>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let mut body = BoundedStream::new(body, self.guard, request.declared_length);
        let mut hasher = StreamingHash::new(self.config.digest_algorithm);
        let mut spool = Spool::new(
            request.declared_length,
            self.config.spool_threshold,
            self.config.spool_dir.clone(),
        )
        .map_err(IngestError::Spool)?;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            spool.write(&chunk).await.map_err(IngestError::Spool)?;
        }

        let computed = hasher.finalize();
        if !verify_digest(&computed, &request.declared_hash) {
            return Err(IngestError::HashMismatch {
                declared: request.declared_hash,
                computed,
            });
        }
        spool.finish().await.map_err(IngestError::Spool)
    }

    async fn link_edge(&self, parent: ObjectHash, child: ObjectHash) -> IngestResult<bool> {
        let index = Arc::clone(&self.index);
        let linked = tokio::task::spawn_blocking(move || index.link(&parent, &child))
            .await
            .map_err(|e| IngestError::Store(cairn_store::StoreError::Io(io::Error::other(e))))??;
        Ok(linked)
    }

    // -----------------------------------------------------------------------
    // Reads and explicit links
    // -----------------------------------------------------------------------

    /// Header of a committed object.
    pub async fn get(&self, hash: &ObjectHash) -> IngestResult<StoredObject> {
        Ok(self.store.get(hash).await?)
    }

    /// Whole payload of a committed object.
    pub async fn read_content(&self, hash: &ObjectHash) -> IngestResult<Bytes> {
        Ok(self.store.read_content(hash).await?)
    }

    /// Streaming reader over a committed object's payload.
    pub async fn open_content(&self, hash: &ObjectHash) -> IngestResult<ContentReader> {
        Ok(self.store.open_content(hash).await?)
    }

    /// Children of a stored object.
    ///
    /// A parent that is not in the store is [`IngestError::UnknownObject`];
    /// a stored parent without children yields an empty sequence.
    pub async fn children(&self, parent: &ObjectHash) -> IngestResult<Children> {
        if !self.store.contains(parent).await? {
            return Err(IngestError::UnknownObject(*parent));
        }
        Ok(self.index.children(parent)?)
    }

    /// Link two stored objects. Returns `true` if the edge is new.
    pub async fn link(&self, parent: &ObjectHash, child: &ObjectHash) -> IngestResult<bool> {
        for hash in [parent, child] {
            if !self.store.contains(hash).await? {
                return Err(IngestError::UnknownObject(*hash));
            }
        }
        let linked = self.link_edge(*parent, *child).await?;
        debug!(%parent, %child, linked, "explicit link");
        Ok(linked)
    }
}

impl fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("config", &self.config)
            .field("backend", &self.store.backend())
            .finish()
    }
}

fn reject(state: IngestState, hash: Option<&ObjectHash>, err: IngestError) -> IngestError {
    let kind = err.kind();
    match hash {
        Some(hash) => debug!(%hash, from = %state, %kind, error = %err, "ingest rejected"),
        None => debug!(from = %state, %kind, error = %err, "ingest rejected"),
    }
    err
}
