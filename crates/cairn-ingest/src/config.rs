use std::path::PathBuf;
use std::time::Duration;

use cairn_crypto::HashAlgorithm;
use serde::{Deserialize, Serialize};

use crate::guard::DEFAULT_MAX_OBJECT_SIZE;

/// Default size below which an upload is staged in memory.
pub const DEFAULT_SPOOL_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Configuration for the ingestion pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Largest object accepted, in bytes.
    pub max_object_size: u64,
    /// Digest algorithm that declared hashes are computed with.
    pub digest_algorithm: HashAlgorithm,
    /// Uploads larger than this are spooled to a temporary file.
    pub spool_threshold: u64,
    /// Directory for spool files. Defaults to the system temp directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spool_dir: Option<PathBuf>,
    /// Wall-clock budget for validating and hashing one upload.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub ingest_timeout: Option<Duration>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            digest_algorithm: HashAlgorithm::default(),
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
            spool_dir: None,
            ingest_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl IngestConfig {
    pub fn with_max_object_size(mut self, max: u64) -> Self {
        self.max_object_size = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ingest_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.max_object_size, 4_000_000_000);
        assert_eq!(config.digest_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.ingest_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"max_object_size": 10, "ingest_timeout": "2s"}"#).unwrap();
        assert_eq!(config.max_object_size, 10);
        assert_eq!(config.ingest_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.spool_threshold, DEFAULT_SPOOL_THRESHOLD);
    }

    #[test]
    fn digest_algorithm_by_name() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"digest_algorithm": "blake3"}"#).unwrap();
        assert_eq!(config.digest_algorithm, HashAlgorithm::Blake3);
    }
}
