//! In-memory relation index for testing and ephemeral use.
//!
//! [`InMemoryRelationIndex`] keeps one child list per parent, each behind its
//! own mutex. The outer map lock is held only long enough to find or create a
//! parent's slot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use cairn_types::ObjectHash;

use crate::error::{IndexError, IndexResult};
use crate::traits::{Children, RelationIndex};

/// Children of one parent: insertion order plus a membership set.
#[derive(Debug, Default)]
pub(crate) struct ChildList {
    order: Vec<ObjectHash>,
    seen: HashSet<ObjectHash>,
}

impl ChildList {
    pub(crate) fn get(&self, index: usize) -> Option<ObjectHash> {
        self.order.get(index).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    fn contains(&self, child: &ObjectHash) -> bool {
        self.seen.contains(child)
    }

    fn push(&mut self, child: ObjectHash) {
        self.seen.insert(child);
        self.order.push(child);
    }
}

pub(crate) type ParentSlot = Mutex<ChildList>;

/// Parent → children table shared by the in-memory and log-backed indexes.
#[derive(Debug, Default)]
pub(crate) struct RelationTable {
    parents: RwLock<HashMap<ObjectHash, Arc<ParentSlot>>>,
}

impl RelationTable {
    fn existing_slot(&self, parent: &ObjectHash) -> IndexResult<Option<Arc<ParentSlot>>> {
        let parents = self.parents.read().map_err(|e| {
            IndexError::Poisoned(e.to_string())
        })?;
        Ok(parents.get(parent).cloned())
    }

    fn slot_for(&self, parent: &ObjectHash) -> IndexResult<Arc<ParentSlot>> {
        if let Some(slot) = self.existing_slot(parent)? {
            return Ok(slot);
        }
        let mut parents = self.parents.write().map_err(|e| {
            IndexError::Poisoned(e.to_string())
        })?;
        Ok(Arc::clone(parents.entry(*parent).or_default()))
    }

    /// Insert `parent → child` unless present.
    ///
    /// `record` runs under the parent's lock just before the in-memory insert,
    /// so a durable backend can append the edge first; if it fails the edge is
    /// not recorded.
    pub(crate) fn link_with(
        &self,
        parent: &ObjectHash,
        child: &ObjectHash,
        record: impl FnOnce() -> IndexResult<()>,
    ) -> IndexResult<bool> {
        let slot = self.slot_for(parent)?;
        let mut list = slot.lock().map_err(|e| IndexError::Poisoned(e.to_string()))?;
        if list.contains(child) {
            return Ok(false);
        }
        record()?;
        list.push(*child);
        Ok(true)
    }

    pub(crate) fn children(&self, parent: &ObjectHash) -> IndexResult<Children> {
        let Some(slot) = self.existing_slot(parent)? else {
            return Ok(Children::empty());
        };
        let end = slot.lock().map_err(|e| IndexError::Poisoned(e.to_string()))?.len();
        Ok(Children::over(slot, end))
    }

    pub(crate) fn parents(&self) -> IndexResult<Vec<ObjectHash>> {
        let parents = self.parents.read().map_err(|e| {
            IndexError::Poisoned(e.to_string())
        })?;
        let mut result: Vec<ObjectHash> = parents
            .iter()
            .filter(|(_, slot)| slot.lock().map(|l| l.len() > 0).unwrap_or(false))
            .map(|(k, _)| *k)
            .collect();
        result.sort();
        Ok(result)
    }
}

/// An in-memory implementation of [`RelationIndex`].
///
/// Data is lost when the index is dropped.
#[derive(Debug, Default)]
pub struct InMemoryRelationIndex {
    table: RelationTable,
}

impl InMemoryRelationIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelationIndex for InMemoryRelationIndex {
    fn link(&self, parent: &ObjectHash, child: &ObjectHash) -> IndexResult<bool> {
        self.table.link_with(parent, child, || Ok(()))
    }

    fn children(&self, parent: &ObjectHash) -> IndexResult<Children> {
        self.table.children(parent)
    }

    fn parents(&self) -> IndexResult<Vec<ObjectHash>> {
        self.table.parents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn h(byte: u8) -> ObjectHash {
        ObjectHash::from_digest([byte; 32])
    }

    #[test]
    fn unknown_parent_has_no_children() {
        let index = InMemoryRelationIndex::new();
        assert_eq!(index.children(&h(1)).unwrap().count(), 0);
        assert_eq!(index.child_count(&h(1)).unwrap(), 0);
    }

    #[test]
    fn link_twice_records_once() {
        let index = InMemoryRelationIndex::new();
        assert!(index.link(&h(1), &h(2)).unwrap());
        assert!(!index.link(&h(1), &h(2)).unwrap());
        let kids: Vec<_> = index.children(&h(1)).unwrap().collect();
        assert_eq!(kids, vec![h(2)]);
    }

    #[test]
    fn children_keep_insertion_order() {
        let index = InMemoryRelationIndex::new();
        for child in [9, 3, 7, 3, 1] {
            index.link(&h(0), &h(child)).unwrap();
        }
        let kids: Vec<_> = index.children(&h(0)).unwrap().collect();
        assert_eq!(kids, vec![h(9), h(3), h(7), h(1)]);
    }

    #[test]
    fn each_call_restarts_the_sequence() {
        let index = InMemoryRelationIndex::new();
        index.link(&h(0), &h(1)).unwrap();
        index.link(&h(0), &h(2)).unwrap();

        let mut first = index.children(&h(0)).unwrap();
        assert_eq!(first.next(), Some(h(1)));
        let second: Vec<_> = index.children(&h(0)).unwrap().collect();
        assert_eq!(second, vec![h(1), h(2)]);
        assert_eq!(first.next(), Some(h(2)));
        assert_eq!(first.next(), None);
    }

    #[test]
    fn sequence_is_bounded_at_creation() {
        let index = InMemoryRelationIndex::new();
        index.link(&h(0), &h(1)).unwrap();
        let seq = index.children(&h(0)).unwrap();
        index.link(&h(0), &h(2)).unwrap();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.collect::<Vec<_>>(), vec![h(1)]);
    }

    #[test]
    fn cycles_are_allowed() {
        let index = InMemoryRelationIndex::new();
        index.link(&h(1), &h(2)).unwrap();
        index.link(&h(2), &h(1)).unwrap();
        index.link(&h(3), &h(3)).unwrap();
        assert_eq!(index.parents().unwrap(), vec![h(1), h(2), h(3)]);
    }

    #[test]
    fn concurrent_links_to_one_parent() {
        let index = Arc::new(InMemoryRelationIndex::new());
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for c in 0..32u8 {
                        // Every thread links the same 32 children.
                        index.link(&h(200), &h(c)).unwrap();
                        index.link(&h(t), &h(c)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should not panic");
        }
        assert_eq!(index.child_count(&h(200)).unwrap(), 32);
        for t in 0..8u8 {
            assert_eq!(index.child_count(&h(t)).unwrap(), 32);
        }
    }

    #[test]
    fn failed_record_leaves_edge_unlinked() {
        let table = RelationTable::default();
        let err = table.link_with(&h(1), &h(2), || {
            Err(IndexError::Serialization("disk full".into()))
        });
        assert!(err.is_err());
        assert_eq!(table.children(&h(1)).unwrap().count(), 0);
        assert!(table.parents().unwrap().is_empty());
    }
}
