//! Digest primitives for Cairn.
//!
//! Provides incremental (streaming) content hashing over a choice of 256-bit
//! algorithms and full-length digest comparison.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::{hash_bytes, verify_digest, AlgorithmError, HashAlgorithm, StreamingHash};
