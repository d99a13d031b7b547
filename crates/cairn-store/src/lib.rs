//! Content-addressed object storage for Cairn.
//!
//! Objects are immutable byte payloads identified by the digest of their
//! content, each stored with a small header ([`StoredObject`]) naming its
//! length, type tag and opaque caller metadata.
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsObjectStore`] -- durable store under a root directory
//!
//! # Design Rules
//!
//! 1. Objects are immutable once committed; one object per digest.
//! 2. Re-submitting an identical object is a no-op; a different object under a
//!    stored digest is a hard `HashCollisionMismatch`, never an overwrite.
//! 3. Writes are serialized per digest ([`KeyedLocks`]) and parallel across
//!    digests.
//! 4. Commits are atomic: nothing is visible until the commit completes.
//! 5. The store never interprets object contents.
//! 6. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod locks;
pub mod memory;
pub mod object;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use locks::{KeyGuard, KeyedLocks};
pub use memory::InMemoryObjectStore;
pub use object::{same_content, Content, ContentReader, PutOutcome, StoredObject};
pub use traits::ObjectStore;
