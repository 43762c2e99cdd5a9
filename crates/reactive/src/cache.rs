//! Bounded cache of reactive entries.
//!
//! This module provides `BoundedReactiveCache`, which maps string keys to
//! reactive entries and evicts entries nobody is subscribed to once the
//! configured capacity is reached.

use crate::query::ReactiveQuery;
use crate::subscription::IdleHook;
use crate::value::ReactiveValue;
use parking_lot::Mutex;
use quarry_core::OrderedMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Default number of resident entries.
pub const DEFAULT_CAPACITY: usize = 5;

/// Configuration for [`BoundedReactiveCache`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum resident entries before idle ones are evicted.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// An entry the cache can hold.
pub trait Reactive: Clone + Send + Sync + 'static {
    /// Number of live subscribers. Entries at zero may be evicted.
    fn subscriber_count(&self) -> usize;

    /// Installs the hook run when the entry loses its last subscriber.
    fn set_idle_hook(&self, hook: Option<IdleHook>);

    /// True once the entry has been torn down and can no longer be attached.
    fn is_destroyed(&self) -> bool;
}

impl<T: 'static> Reactive for ReactiveQuery<T> {
    fn subscriber_count(&self) -> usize {
        ReactiveQuery::subscriber_count(self)
    }

    fn set_idle_hook(&self, hook: Option<IdleHook>) {
        ReactiveQuery::set_idle_hook(self, hook)
    }

    fn is_destroyed(&self) -> bool {
        ReactiveQuery::is_destroyed(self)
    }
}

impl<T: Clone + Send + Sync + 'static> Reactive for ReactiveValue<T> {
    fn subscriber_count(&self) -> usize {
        ReactiveValue::subscriber_count(self)
    }

    fn set_idle_hook(&self, hook: Option<IdleHook>) {
        ReactiveValue::set_idle_hook(self, hook)
    }

    fn is_destroyed(&self) -> bool {
        ReactiveValue::is_destroyed(self)
    }
}

struct CacheShared<E> {
    capacity: usize,
    entries: Mutex<OrderedMap<E>>,
}

/// String-keyed cache of reactive entries with lazy, capacity-driven
/// eviction.
///
/// An entry with live subscribers is never evicted: when every resident
/// entry is in use the cache grows past its capacity and shrinks back as
/// entries go idle. Lookups and the eviction scan share one lock; fetches
/// never run under it.
pub struct BoundedReactiveCache<E> {
    shared: Arc<CacheShared<E>>,
}

impl<E> Clone for BoundedReactiveCache<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E: Reactive> BoundedReactiveCache<E> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_capacity(config.capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                capacity,
                entries: Mutex::new(OrderedMap::new()),
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns the entry for `key`, if resident. A destroyed entry is
    /// dropped from the cache and reported as absent.
    pub fn get(&self, key: &str) -> Option<E> {
        let mut entries = self.shared.entries.lock();
        let entry = entries.get(key)?.clone();
        if entry.is_destroyed() {
            discard(&mut entries, key);
            return None;
        }
        Some(entry)
    }

    /// Returns the entry for `key`, creating it with `factory` on a miss.
    ///
    /// A destroyed entry counts as a miss and is replaced. A miss at
    /// capacity first evicts idle entries, oldest first, until there is
    /// room or none are left. `factory` runs under the cache lock and must
    /// not touch this cache.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> E
    where
        F: FnOnce() -> E,
    {
        let mut entries = self.shared.entries.lock();
        if let Some(entry) = entries.get(key) {
            if !entry.is_destroyed() {
                return entry.clone();
            }
            discard(&mut entries, key);
        }
        if entries.len() >= self.shared.capacity {
            let evicted = evict(&mut entries, self.shared.capacity.saturating_sub(1));
            if entries.len() >= self.shared.capacity {
                tracing::debug!(
                    key = %key,
                    evicted,
                    resident = entries.len(),
                    capacity = self.shared.capacity,
                    "no idle entry to evict, cache over capacity"
                );
            }
        }
        let entry = factory();
        entry.set_idle_hook(Some(idle_hook(Arc::downgrade(&self.shared))));
        entries.insert(key, entry.clone());
        entry
    }

    /// Removes `key`, returning its entry.
    pub fn remove(&self, key: &str) -> Option<E> {
        let entry = self.shared.entries.lock().remove(key)?;
        entry.set_idle_hook(None);
        Some(entry)
    }

    /// Evicts every idle entry regardless of capacity. Returns how many.
    pub fn evict_idle(&self) -> usize {
        evict(&mut self.shared.entries.lock(), 0)
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.lock().is_empty()
    }

    /// Resident keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.shared.entries.lock().keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.entries.lock().contains_key(key)
    }
}

fn idle_hook<E: Reactive>(cache: Weak<CacheShared<E>>) -> IdleHook {
    Arc::new(move || {
        if let Some(cache) = cache.upgrade() {
            let mut entries = cache.entries.lock();
            // Only an earlier overflow is resolved here.
            if entries.len() > cache.capacity {
                evict(&mut entries, cache.capacity);
            }
        }
    })
}

fn discard<E: Reactive>(entries: &mut OrderedMap<E>, key: &str) {
    if let Some(entry) = entries.remove(key) {
        entry.set_idle_hook(None);
        tracing::debug!(key = %key, "dropped destroyed entry");
    }
}

/// Scans oldest first and removes idle entries while more than `keep` are
/// resident. Returns how many were removed.
fn evict<E: Reactive>(entries: &mut OrderedMap<E>, keep: usize) -> usize {
    let mut evicted = 0;
    for key in entries.keys() {
        if entries.len() <= keep {
            break;
        }
        let idle = entries.get(&key).map_or(false, |e| e.subscriber_count() == 0);
        if !idle {
            continue;
        }
        if let Some(entry) = entries.remove(&key) {
            entry.set_idle_hook(None);
            evicted += 1;
            tracing::debug!(key = %key, "evicted idle entry");
        }
    }
    evicted
}
