//! The [`RelationIndex`] trait and the [`Children`] sequence it hands out.

use std::sync::{Arc, PoisonError};

use cairn_types::ObjectHash;

use crate::error::IndexResult;
use crate::memory::ParentSlot;

/// Storage backend for parent → child edges.
///
/// Implementations must be thread-safe (`Send + Sync`). Appends for one
/// parent are serialized by a lock scoped to that parent; different parents
/// proceed in parallel.
pub trait RelationIndex: Send + Sync {
    /// Record the edge `parent → child`.
    ///
    /// Returns `Ok(true)` if the edge is new and `Ok(false)` if it was already
    /// recorded. Linking the same pair twice is never an error.
    fn link(&self, parent: &ObjectHash, child: &ObjectHash) -> IndexResult<bool>;

    /// The children of `parent` in the order they were first linked.
    ///
    /// An unknown parent yields an empty sequence. Each call starts a fresh
    /// sequence from the first child.
    fn children(&self, parent: &ObjectHash) -> IndexResult<Children>;

    /// Number of distinct children recorded for `parent`.
    fn child_count(&self, parent: &ObjectHash) -> IndexResult<usize> {
        Ok(self.children(parent)?.len())
    }

    /// Every parent with at least one child, sorted.
    fn parents(&self) -> IndexResult<Vec<ObjectHash>>;
}

/// Lazy, finite sequence of child hashes.
///
/// The sequence covers the children that existed when it was created; edges
/// linked afterwards are not included. Items are read from the index one at a
/// time rather than copied up front.
pub struct Children {
    slot: Option<Arc<ParentSlot>>,
    pos: usize,
    end: usize,
}

impl Children {
    pub(crate) fn over(slot: Arc<ParentSlot>, end: usize) -> Self {
        Self {
            slot: Some(slot),
            pos: 0,
            end,
        }
    }

    /// A sequence with no children.
    pub fn empty() -> Self {
        Self {
            slot: None,
            pos: 0,
            end: 0,
        }
    }
}

impl Iterator for Children {
    type Item = ObjectHash;

    fn next(&mut self) -> Option<ObjectHash> {
        if self.pos >= self.end {
            return None;
        }
        let slot = self.slot.as_ref()?;
        let list = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let item = list.get(self.pos);
        self.pos += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Children {}

impl std::fmt::Debug for Children {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Children")
            .field("pos", &self.pos)
            .field("end", &self.end)
            .finish()
    }
}
