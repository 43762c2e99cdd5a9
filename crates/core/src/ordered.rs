//! Insertion-ordered map keyed by strings.
//!
//! Both bounded caches scan their entries oldest-first when they need room,
//! so they keep entries in an `OrderedMap`: O(1) lookups through a hash
//! index plus a sequence-ordered key list for the scan.

use hashbrown::HashMap;
use std::collections::BTreeMap;

/// A string-keyed map that remembers insertion order.
///
/// Re-inserting an existing key replaces the value but keeps its position.
#[derive(Debug)]
pub struct OrderedMap<V> {
    /// Key -> (insertion sequence, value).
    entries: HashMap<String, (u64, V)>,
    /// Insertion sequence -> key.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> OrderedMap<V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Inserts `value` under `key`, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        if let Some((_, slot)) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, (seq, value));
        None
    }

    /// Gets a reference to the value for `key`.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Gets a mutable reference to the value for `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key).map(|(_, v)| v)
    }

    /// Checks if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let (seq, value) = self.entries.remove(key)?;
        self.order.remove(&seq);
        Some(value)
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }

    /// Iterates entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.order.values().filter_map(move |key| {
            self.entries
                .get(key)
                .map(|(_, value)| (key.as_str(), value))
        })
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
