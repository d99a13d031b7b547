use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::OwnedMutexGuard;

/// Arena of async lock handles keyed by value.
///
/// Each key gets its own mutex, created on first use and dropped once the
/// last holder or waiter lets go. Callers contending on the same key queue
/// behind each other; different keys never contend beyond the brief lookup
/// in the arena map.
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Weak<tokio::sync::Mutex<()>>>>,
}

/// Exclusive hold on one key of a [`KeyedLocks`] arena.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> KeyGuard {
        let slot = self.slot(key);
        KeyGuard {
            _guard: slot.lock_owned().await,
        }
    }

    /// Number of keys that currently have a live lock handle.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    fn slot(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slots.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        slots.retain(|_, w| w.strong_count() > 0);
        let fresh = Arc::new(tokio::sync::Mutex::new(()));
        slots.insert(key.clone(), Arc::downgrade(&fresh));
        fresh
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("KeyedLocks").field("slots", &slots).finish()
    }
}
