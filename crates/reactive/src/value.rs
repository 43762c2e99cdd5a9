//! Settable reactive values.

use crate::scope::{LifetimeScope, ListenerId};
use crate::subscription::{Dispatcher, IdleHook, Outgoing, Sink, SubscriberId, SubscriberSet};
use parking_lot::Mutex;
use quarry_core::{Error, Result};
use std::sync::Arc;

struct ValueInner<T> {
    destroyed: bool,
    value: Option<(u64, T)>,
    subscribers: SubscriberSet<T>,
    next_seq: u64,
}

struct ValueShared<T> {
    inner: Mutex<ValueInner<T>>,
    dispatcher: Dispatcher,
    idle_hook: Mutex<Option<IdleHook>>,
}

/// A value that subscribers observe until their scope ends.
///
/// Follows the same attach/detach contract as `ReactiveQuery`, but the
/// value is set by the owner instead of fetched.
pub struct ReactiveValue<T> {
    shared: Arc<ValueShared<T>>,
}

impl<T> Clone for ReactiveValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ReactiveValue<T> {
    /// Creates a value with nothing set.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ValueShared {
                inner: Mutex::new(ValueInner {
                    destroyed: false,
                    value: None,
                    subscribers: SubscriberSet::new(),
                    next_seq: 0,
                }),
                dispatcher: Dispatcher::new(),
                idle_hook: Mutex::new(None),
            }),
        }
    }

    /// Creates a value holding `value`.
    pub fn with_value(value: T) -> Self {
        let this = Self::new();
        {
            let mut inner = this.shared.inner.lock();
            inner.next_seq = 1;
            inner.value = Some((1, value));
        }
        this
    }

    /// Replaces the value and delivers it to every subscriber.
    pub fn set(&self, value: T) -> Result<()> {
        let outgoing = {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return Err(Error::closed("reactive value"));
            }
            inner.next_seq += 1;
            let seq = inner.next_seq;
            inner.value = Some((seq, value.clone()));
            inner.subscribers.broadcast(seq, value)
        };
        self.dispatch(outgoing);
        Ok(())
    }

    /// The current value, without attaching.
    pub fn current_value(&self) -> Result<Option<T>> {
        let inner = self.shared.inner.lock();
        if inner.destroyed {
            return Err(Error::closed("reactive value"));
        }
        Ok(inner.value.as_ref().map(|(_, v)| v.clone()))
    }

    /// Starts delivering to `sink`. A value already set is delivered right
    /// away.
    pub fn attach<F>(&self, id: SubscriberId, scope: &LifetimeScope, sink: F) -> Result<bool>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let sink: Sink<T> = Arc::new(sink);
        let outgoing = {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return Err(Error::closed("reactive value"));
            }
            if inner.subscribers.contains(id) {
                return Ok(false);
            }
            let token = inner.subscribers.next_token();
            let weak = Arc::downgrade(&self.shared);
            let Some(listener) = scope.on_end(move || {
                if let Some(shared) = weak.upgrade() {
                    ReactiveValue { shared }.remove(id, Some(token));
                }
            }) else {
                return Ok(false);
            };
            inner.subscribers.insert(id, token, sink, scope.clone(), listener);
            match inner.value.clone() {
                Some((seq, value)) => inner.subscribers.unicast(id, seq, value),
                None => None,
            }
        };
        if let Some(outgoing) = outgoing {
            self.dispatch(outgoing);
        }
        Ok(true)
    }

    /// Stops delivering to `id`. Returns true if it was attached.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.remove(id, None)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.inner.lock().subscribers.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    /// Drops every subscriber and the value. Later calls fail with
    /// `ResourceClosed`.
    pub fn destroy(&self) {
        let listeners = {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.value = None;
            inner.subscribers.drain()
        };
        release_listeners(listeners);
        self.run_idle_hook();
    }

    pub fn set_idle_hook(&self, hook: Option<IdleHook>) {
        *self.shared.idle_hook.lock() = hook;
    }

    fn remove(&self, id: SubscriberId, token: Option<u64>) -> bool {
        let (listener, idle) = {
            let mut inner = self.shared.inner.lock();
            let Some(listener) = inner.subscribers.remove(id, token) else {
                return false;
            };
            (listener, inner.subscribers.is_empty())
        };
        if token.is_none() {
            release_listeners(vec![listener]);
        }
        if idle {
            self.run_idle_hook();
        }
        true
    }

    fn dispatch(&self, outgoing: Outgoing<T>) {
        self.shared.dispatcher.dispatch(outgoing, |id, token| {
            self.shared.inner.lock().subscribers.is_current(id, token)
        });
    }

    fn run_idle_hook(&self) {
        let hook = self.shared.idle_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ReactiveValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn release_listeners(listeners: Vec<(LifetimeScope, ListenerId)>) {
    for (scope, listener) in listeners {
        scope.remove_listener(listener);
    }
}
