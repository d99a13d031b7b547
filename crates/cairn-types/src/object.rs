use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Digest length in bytes.
pub const HASH_LEN: usize = 32;

/// Length of the canonical textual form: lowercase hex, two characters per byte.
pub const HASH_HEX_LEN: usize = HASH_LEN * 2;

/// Content-addressed identifier for a stored object.
///
/// An `ObjectHash` is the 256-bit digest of an object's bytes. Identical
/// content always produces the same hash, so objects are deduplicated and
/// verifiable by construction. The textual form is exactly 64 lowercase hex
/// characters; uppercase spellings are rejected so that a digest has exactly
/// one valid encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHash([u8; HASH_LEN]);

impl ObjectHash {
    /// Wrap a pre-computed digest.
    pub const fn from_digest(digest: [u8; HASH_LEN]) -> Self {
        Self(digest)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Split the hex form into a two-character fan-out prefix and the rest.
    pub fn fanout(&self) -> (String, String) {
        let hex = self.to_hex();
        let (prefix, rest) = hex.split_at(2);
        (prefix.to_string(), rest.to_string())
    }

    /// Parse from the canonical 64-character lowercase hex form.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.len() != HASH_HEX_LEN {
            return Err(TypeError::InvalidLength {
                expected: HASH_HEX_LEN,
                actual: s.chars().count(),
            });
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(TypeError::InvalidHex(format!(
                "unexpected character {bad:?}"
            )));
        }
        let mut arr = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut arr).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHash({})", self.short_hex())
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectHash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; HASH_LEN]> for ObjectHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<ObjectHash> for [u8; HASH_LEN] {
    fn from(hash: ObjectHash) -> Self {
        hash.0
    }
}

impl Serialize for ObjectHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
