//! Upload metadata and its validated form.

use cairn_types::ObjectHash;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};
use crate::guard::SizeGuard;

/// Longest accepted type tag.
pub const MAX_TYPE_LEN: usize = 256;

/// Metadata a client sends ahead of an object's bytes.
///
/// Hashes are kept as raw strings here so that their format is checked while
/// validating, after the size check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    /// Opaque client metadata stored with the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Declared digest, 64 lowercase hex characters.
    pub content_hash: String,
    /// Declared payload length in bytes.
    pub content_length: u64,
    /// Type tag, e.g. `"blob"`.
    #[serde(rename = "type")]
    pub object_type: String,
    /// Optional parent to link the object under once committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
}

impl UploadMetadata {
    pub fn new(content_hash: impl Into<String>, content_length: u64, object_type: impl Into<String>) -> Self {
        Self {
            metadata: None,
            content_hash: content_hash.into(),
            content_length,
            object_type: object_type.into(),
            parent_hash: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_hash = Some(parent.into());
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Parse metadata from its JSON encoding.
    pub fn from_json(raw: &[u8]) -> IngestResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| IngestError::BadRequest(format!("invalid upload metadata: {e}")))
    }

    /// Check the metadata without looking at any body byte.
    ///
    /// Order: declared size, declared hash, type tag, parent hash.
    pub fn validate(&self, guard: &SizeGuard) -> IngestResult<IngestRequest> {
        guard.check_declared(self.content_length)?;

        let declared_hash = ObjectHash::from_hex(&self.content_hash)
            .map_err(|e| IngestError::BadRequest(format!("content_hash: {e}")))?;

        let object_type = self.object_type.trim();
        if object_type.is_empty() {
            return Err(IngestError::BadRequest("type must not be empty".into()));
        }
        if object_type.len() > MAX_TYPE_LEN {
            return Err(IngestError::BadRequest(format!(
                "type longer than {MAX_TYPE_LEN} bytes"
            )));
        }

        let parent = self
            .parent_hash
            .as_deref()
            .map(ObjectHash::from_hex)
            .transpose()
            .map_err(|e| IngestError::BadRequest(format!("parent_hash: {e}")))?;

        Ok(IngestRequest {
            declared_hash,
            declared_length: self.content_length,
            object_type: object_type.to_owned(),
            metadata: self.metadata.clone(),
            parent,
        })
    }
}

/// Upload metadata that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestRequest {
    pub declared_hash: ObjectHash,
    pub declared_length: u64,
    pub object_type: String,
    pub metadata: Option<String>,
    pub parent: Option<ObjectHash>,
}
