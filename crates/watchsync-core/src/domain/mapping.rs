//! Bidirectional map between local notification keys and remote ids.
//!
//! Both directions are kept in step: a key maps to at most one id and an id
//! to at most one key.  Removing either side removes the whole pair.  The map
//! itself is not synchronised; callers hold it behind one lock so that the
//! local event path and the remote signal path mutate it in a single
//! critical section.

use std::collections::HashMap;

/// `key ↔ remote id` correspondence for forwarded notifications.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotificationIdMap {
    by_key: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
}

impl NotificationIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to `id`, returning the id `key` was previously bound to.
    ///
    /// Any pair already using `id` under a different key is dropped first, so
    /// the one-to-one invariant holds after every call.
    pub fn insert(&mut self, key: impl Into<String>, id: u32) -> Option<u32> {
        let key = key.into();
        if let Some(stale_key) = self.by_id.remove(&id) {
            self.by_key.remove(&stale_key);
        }
        let previous = self.by_key.insert(key.clone(), id);
        if let Some(old_id) = previous {
            self.by_id.remove(&old_id);
        }
        self.by_id.insert(id, key);
        previous
    }

    pub fn id_for(&self, key: &str) -> Option<u32> {
        self.by_key.get(key).copied()
    }

    pub fn key_for(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Removes the pair for `key`, returning its remote id.
    pub fn remove_by_key(&mut self, key: &str) -> Option<u32> {
        let id = self.by_key.remove(key)?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Removes the pair for `id`, returning its local key.
    pub fn remove_by_id(&mut self, id: u32) -> Option<String> {
        let key = self.by_id.remove(&id)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_id.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
