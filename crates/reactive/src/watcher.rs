//! Change watching for the live snapshot.

use crate::snapshot::Snapshot;
use quarry_core::Result;
use quarry_storage::{ChangeCallback, ObserverId};
use std::sync::Arc;

/// Keeps at most one change observer registered, against one snapshot.
///
/// Arming always disarms first, so the watcher is never registered on two
/// snapshots at once.
pub struct ChangeWatcher<T> {
    armed: Option<(Arc<Snapshot<T>>, ObserverId)>,
}

impl<T> ChangeWatcher<T> {
    pub fn new() -> Self {
        Self { armed: None }
    }

    /// Registers `callback` against the data `snapshot` was read from.
    pub fn arm(&mut self, snapshot: &Arc<Snapshot<T>>, callback: ChangeCallback) -> Result<()> {
        self.disarm();
        let id = snapshot.register_observer(callback)?;
        self.armed = Some((snapshot.clone(), id));
        tracing::trace!(generation = snapshot.generation(), "change watcher armed");
        Ok(())
    }

    /// Unregisters the observer, if armed. Returns true if it was.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some((snapshot, id)) => {
                snapshot.unregister_observer(id);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Generation of the snapshot the watcher is armed on.
    pub fn armed_generation(&self) -> Option<u64> {
        self.armed.as_ref().map(|(s, _)| s.generation())
    }
}

impl<T> Default for ChangeWatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ChangeWatcher<T> {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Parser;
    use quarry_core::{QueryDescriptor, Row};
    use quarry_storage::{BackingStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open(store: &MemoryStore, generation: u64) -> Arc<Snapshot<()>> {
        let cursor = store.query(&QueryDescriptor::new("t")).unwrap().unwrap();
        let parser: Arc<dyn Parser<()>> = Arc::new(|_: &Row| ());
        Arc::new(Snapshot::new(generation, cursor, parser))
    }

    #[test]
    fn test_watcher_fires_on_change() {
        let store = MemoryStore::new();
        store.create_table("t", ["n"]).unwrap();
        let snap = open(&store, 1);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut watcher = ChangeWatcher::new();
        watcher
            .arm(&snap, Arc::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        store.insert("t", vec![1.into()]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(watcher.disarm());
        assert!(!watcher.disarm());
        store.insert("t", vec![2.into()]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watcher_rearm_moves_registration() {
        let store = MemoryStore::new();
        store.create_table("t", ["n"]).unwrap();
        let first = open(&store, 1);
        let second = open(&store, 2);
        let mut watcher = ChangeWatcher::new();
        watcher.arm(&first, Arc::new(|| {})).unwrap();
        watcher.arm(&second, Arc::new(|| {})).unwrap();
        assert_eq!(store.observer_count("t"), 1);
        assert_eq!(watcher.armed_generation(), Some(2));
        drop(watcher);
        assert_eq!(store.observer_count("t"), 0);
    }

    #[test]
    fn test_watcher_arm_closed_snapshot_fails() {
        let store = MemoryStore::new();
        store.create_table("t", ["n"]).unwrap();
        let snap = open(&store, 1);
        snap.close();
        let mut watcher = ChangeWatcher::new();
        assert!(watcher.arm(&snap, Arc::new(|| {})).is_err());
        assert!(!watcher.is_armed());
    }
}
