use std::fmt;
use std::str::FromStr;

use cairn_types::{ObjectHash, HASH_LEN};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// The 256-bit digest algorithm that produced (and verifies) object hashes.
///
/// Clients must hash with the same algorithm the service is configured with;
/// the hex form of both is 64 characters, so the algorithm cannot be inferred
/// from a declared hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256 (FIPS 180-4).
    #[default]
    Sha256,
    /// BLAKE3 in its default 256-bit output mode.
    Blake3,
}

impl HashAlgorithm {
    /// Stable identifier used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = AlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(AlgorithmError::Unknown(other.to_string())),
        }
    }
}

/// Errors from algorithm selection.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error("unknown digest algorithm: {0}")]
    Unknown(String),
}

enum HashState {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental content hasher.
///
/// Feed chunks in order with [`update`](Self::update) (or the chaining
/// [`chain`](Self::chain)) and call [`finalize`](Self::finalize) once the
/// stream ends. Finalizing without any input yields the digest of the empty
/// byte string.
pub struct StreamingHash {
    algorithm: HashAlgorithm,
    state: HashState,
    bytes_hashed: u64,
}

impl StreamingHash {
    /// Start a new hash computation.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HashState::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Blake3 => HashState::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self {
            algorithm,
            state,
            bytes_hashed: 0,
        }
    }

    /// Accumulate a chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.state {
            HashState::Sha256(h) => h.update(chunk),
            HashState::Blake3(h) => {
                h.update(chunk);
            }
        }
        self.bytes_hashed += chunk.len() as u64;
    }

    /// Accumulate a chunk and hand the state back.
    pub fn chain(mut self, chunk: &[u8]) -> Self {
        self.update(chunk);
        self
    }

    /// Number of bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Consume the state and produce the digest.
    pub fn finalize(self) -> ObjectHash {
        let digest: [u8; HASH_LEN] = match self.state {
            HashState::Sha256(h) => h.finalize().into(),
            HashState::Blake3(h) => *h.finalize().as_bytes(),
        };
        ObjectHash::from_digest(digest)
    }
}

impl fmt::Debug for StreamingHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingHash")
            .field("algorithm", &self.algorithm)
            .field("bytes_hashed", &self.bytes_hashed)
            .finish()
    }
}

/// One-shot digest of an in-memory buffer.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> ObjectHash {
    StreamingHash::new(algorithm).chain(data).finalize()
}

/// Compare a computed digest against a declared one.
///
/// Every byte is examined before answering; the comparison never exits on the
/// first differing byte.
pub fn verify_digest(computed: &ObjectHash, declared: &ObjectHash) -> bool {
    computed
        .as_bytes()
        .iter()
        .zip(declared.as_bytes().iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
