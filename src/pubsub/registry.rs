//! Id-keyed entity maps that only ever hand out snapshots.
//!
//! Entities lock one map at a time and release it before calling into
//! another entity. Readers therefore get an owned copy, never a live view,
//! so iterating while another task mutates the registry cannot race.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Registry of `T` keyed by id.
#[derive(Debug)]
pub struct Registry<T> {
    entries: Mutex<HashMap<String, T>>,
}

impl<T: Clone> Registry<T> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `value` under `id` unless the id is already taken.
    ///
    /// Returns `true` if the entry was added.
    pub fn register(&self, id: &str, value: T) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return false;
        }
        entries.insert(id.to_string(), value);
        true
    }

    /// Remove the entry under `id` only if `matches` accepts it.
    pub fn unregister_if(&self, id: &str, matches: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut entries = self.entries.lock();
        if entries.get(id).is_some_and(matches) {
            entries.remove(id)
        } else {
            None
        }
    }

    /// Look up a single entry.
    pub fn get(&self, id: &str) -> Option<T> {
        self.entries.lock().get(id).cloned()
    }

    /// Owned copy of the whole map.
    pub fn snapshot(&self) -> HashMap<String, T> {
        self.entries.lock().clone()
    }

    /// Owned copy of the values.
    pub fn values(&self) -> Vec<T> {
        self.entries.lock().values().cloned().collect()
    }

    /// Number of entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
