//! Foundation types for Cairn, a content-addressed object service.
//!
//! Every other Cairn crate depends on `cairn-types`. The central type is
//! [`ObjectHash`]: the 256-bit digest that names a stored object.

pub mod error;
pub mod object;

pub use error::TypeError;
pub use object::{ObjectHash, HASH_HEX_LEN, HASH_LEN};
