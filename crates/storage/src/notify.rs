//! Change-observer registry.
//!
//! This module provides `ObserverRegistry` which tracks change callbacks per
//! target and routes change notifications to them.

use crate::cursor::{ChangeCallback, ObserverId};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Routes change notifications for a target to every registered callback.
///
/// Callbacks are snapshotted under the lock and invoked after it is
/// released, so a callback may register or unregister observers (or query
/// the store again) without deadlocking.
pub struct ObserverRegistry {
    /// Target -> registered callbacks.
    observers: Mutex<HashMap<String, Vec<(ObserverId, ChangeCallback)>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback` for changes to `target`.
    pub fn register(&self, target: &str, callback: ChangeCallback) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .entry(target.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    /// Removes the observer `id` registered on `target`.
    ///
    /// Returns true if it was found.
    pub fn unregister(&self, target: &str, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let Some(list) = observers.get_mut(target) else {
            return false;
        };
        let before = list.len();
        list.retain(|(oid, _)| *oid != id);
        let removed = list.len() < before;
        if list.is_empty() {
            observers.remove(target);
        }
        removed
    }

    /// Notifies every observer of `target`. Returns how many were called.
    pub fn notify(&self, target: &str) -> usize {
        let snapshot: Vec<ChangeCallback> = {
            let observers = self.observers.lock();
            match observers.get(target) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return 0,
            }
        };
        tracing::trace!(target = %target, observers = snapshot.len(), "notifying change");
        for cb in &snapshot {
            cb();
        }
        snapshot.len()
    }

    /// Number of observers registered on `target`.
    pub fn observer_count(&self, target: &str) -> usize {
        self.observers.lock().get(target).map(Vec::len).unwrap_or(0)
    }

    /// Total number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.lock().values().map(Vec::len).sum()
    }

    /// Returns true if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
