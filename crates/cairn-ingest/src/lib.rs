//! Object ingestion for Cairn.
//!
//! An upload passes through a fixed sequence of states:
//!
//! ```text
//! Received → Validating → Hashing → Storing → Linking → Committed
//!                 │           │         │
//!                 └───────────┴─────────┴──→ Rejected
//! ```
//!
//! - **Validating** checks the declared metadata without touching the body:
//!   declared size against the [`SizeGuard`], declared hash format, type tag.
//! - **Hashing** streams the body through a [`BoundedStream`] and a streaming
//!   digest, spooling bytes aside, and compares the result with the declared
//!   hash.
//! - **Storing** commits the verified bytes to the object store. This is the
//!   durability boundary: nothing is stored before it, and cancellation stops
//!   applying once it begins.
//! - **Linking** records the optional parent relation. A failed link is
//!   logged and reported in the receipt; it never undoes the commit.

pub mod config;
pub mod error;
pub mod guard;
pub mod metadata;
pub mod pipeline;
mod spool;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult, RejectionKind};
pub use guard::{BoundedStream, SizeGuard, DEFAULT_MAX_OBJECT_SIZE};
pub use metadata::{IngestRequest, UploadMetadata};
pub use pipeline::{IngestPipeline, IngestReceipt, IngestState, StageTiming};
