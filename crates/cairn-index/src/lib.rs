//! Parent/child relation index for Cairn.
//!
//! Records directed edges between stored objects' hashes and answers "which
//! children does this parent have?" in insertion order. Edges are opaque: the
//! graph may contain cycles, and no edge is ever removed.
//!
//! # Backends
//!
//! - [`InMemoryRelationIndex`] -- ephemeral, for tests and embedding
//! - [`LogRelationIndex`] -- durable, replays an append-only relation log on open

pub mod error;
pub mod log;
pub mod memory;
pub mod traits;

pub use error::{IndexError, IndexResult};
pub use log::{LogRelationIndex, SyncMode};
pub use memory::InMemoryRelationIndex;
pub use traits::{Children, RelationIndex};
