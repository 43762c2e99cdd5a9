//! Lifetime scopes: the host's "this consumer is gone" signal.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Identifier of a listener registered on a scope.
pub type ListenerId = u64;

type Listener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ScopeState {
    ended: bool,
    listeners: Vec<(ListenerId, Listener)>,
    next_id: ListenerId,
}

/// A lifetime that ends exactly once.
///
/// Clones share the same lifetime. Listeners run on the thread that calls
/// [`LifetimeScope::end`], after the scope's own lock was released.
#[derive(Clone, Default)]
pub struct LifetimeScope {
    state: Arc<Mutex<ScopeState>>,
}

impl LifetimeScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `listener` when the scope ends.
    ///
    /// Returns `None` without running it if the scope already ended.
    pub fn on_end<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.ended {
            return None;
        }
        state.next_id += 1;
        let id = state.next_id;
        state.listeners.push((id, Box::new(listener)));
        Some(id)
    }

    /// Removes a listener. Returns true if it was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(lid, _)| *lid != id);
        state.listeners.len() < before
    }

    /// Ends the scope and runs its listeners. Later calls do nothing.
    pub fn end(&self) {
        let listeners = {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
            std::mem::take(&mut state.listeners)
        };
        for (_, listener) in listeners {
            listener();
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Number of listeners still waiting.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

impl fmt::Debug for LifetimeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LifetimeScope")
            .field("ended", &state.ended)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_scope_end_runs_listeners_once() {
        let scope = LifetimeScope::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let h = hits.clone();
            scope.on_end(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        scope.end();
        scope.end();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(scope.is_ended());
    }

    #[test]
    fn test_scope_on_end_after_end() {
        let scope = LifetimeScope::new();
        scope.end();
        assert!(scope.on_end(|| panic!("must not run")).is_none());
    }

    #[test]
    fn test_scope_remove_listener() {
        let scope = LifetimeScope::new();
        let id = scope.on_end(|| panic!("removed")).unwrap();
        assert!(scope.remove_listener(id));
        assert!(!scope.remove_listener(id));
        scope.end();
    }

    #[test]
    fn test_scope_listener_may_touch_scope() {
        let scope = LifetimeScope::new();
        let inner = scope.clone();
        scope.on_end(move || {
            assert!(inner.is_ended());
            assert!(inner.on_end(|| {}).is_none());
        });
        scope.end();
    }
}
