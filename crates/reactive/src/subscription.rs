//! Subscriber bookkeeping shared by the reactive entry kinds.
//!
//! This module provides the subscriber set keyed by subscriber identity, the
//! per-subscriber delivery sinks, and the ordered delivery of messages to
//! them.

use crate::scope::{LifetimeScope, ListenerId};
use crate::snapshot::Snapshot;
use hashbrown::HashMap;
use parking_lot::ReentrantMutex;
use quarry_core::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Caller-chosen identity of a subscriber.
pub type SubscriberId = u64;

/// Receives deliveries for one subscriber.
pub type Sink<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// Hook run when an entry loses its last subscriber.
pub type IdleHook = Arc<dyn Fn() + Send + Sync>;

/// What a reactive query hands to its subscribers.
pub enum Delivery<T> {
    /// A fetch published a new snapshot.
    Loaded(Arc<Snapshot<T>>),
    /// The store had no data for the query.
    Empty,
    /// The fetch failed. The query does not retry on its own.
    Failed(Error),
}

impl<T> Delivery<T> {
    /// The delivered snapshot, if any.
    pub fn snapshot(&self) -> Option<&Arc<Snapshot<T>>> {
        match self {
            Delivery::Loaded(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Delivery::Loaded(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Delivery::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        match self {
            Delivery::Loaded(snapshot) => Delivery::Loaded(snapshot.clone()),
            Delivery::Empty => Delivery::Empty,
            Delivery::Failed(e) => Delivery::Failed(e.clone()),
        }
    }
}

impl<T> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Loaded(snapshot) => f.debug_tuple("Loaded").field(snapshot).finish(),
            Delivery::Empty => f.write_str("Empty"),
            Delivery::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

/// One attached subscriber.
struct Subscriber<M> {
    /// Distinguishes this attachment from a later one with the same ID.
    token: u64,
    sink: Sink<M>,
    scope: LifetimeScope,
    listener: ListenerId,
    /// Sequence number of the last message delivered.
    delivered: Arc<AtomicU64>,
}

/// A subscriber addressed by a pending delivery.
pub(crate) struct Target<M> {
    id: SubscriberId,
    token: u64,
    sink: Sink<M>,
    delivered: Arc<AtomicU64>,
}

/// A message queued for delivery outside the entry's lock.
pub(crate) struct Outgoing<M> {
    seq: u64,
    message: M,
    targets: Vec<Target<M>>,
}

/// Live subscribers of one reactive entry, keyed by identity.
pub(crate) struct SubscriberSet<M> {
    subscribers: HashMap<SubscriberId, Subscriber<M>>,
    next_token: u64,
}

impl<M> SubscriberSet<M> {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            next_token: 1,
        }
    }

    /// Reserves the token for the next attachment.
    pub fn next_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Adds a subscriber. The caller checked `contains` first.
    pub fn insert(
        &mut self,
        id: SubscriberId,
        token: u64,
        sink: Sink<M>,
        scope: LifetimeScope,
        listener: ListenerId,
    ) {
        self.subscribers.insert(
            id,
            Subscriber {
                token,
                sink,
                scope,
                listener,
                delivered: Arc::new(AtomicU64::new(0)),
            },
        );
    }

    /// Removes `id`, or only the attachment with `token` when given.
    ///
    /// Returns the scope and listener to release.
    pub fn remove(
        &mut self,
        id: SubscriberId,
        token: Option<u64>,
    ) -> Option<(LifetimeScope, ListenerId)> {
        match (self.subscribers.get(&id), token) {
            (None, _) => return None,
            (Some(sub), Some(token)) if sub.token != token => return None,
            _ => {}
        }
        self.subscribers
            .remove(&id)
            .map(|sub| (sub.scope, sub.listener))
    }

    /// Removes every subscriber, returning the scopes and listeners.
    pub fn drain(&mut self) -> Vec<(LifetimeScope, ListenerId)> {
        self.subscribers
            .drain()
            .map(|(_, sub)| (sub.scope, sub.listener))
            .collect()
    }

    #[inline]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    /// Returns true if `id` is still attached through `token`.
    pub fn is_current(&self, id: SubscriberId, token: u64) -> bool {
        self.subscribers.get(&id).map_or(false, |s| s.token == token)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn target(id: SubscriberId, sub: &Subscriber<M>) -> Target<M> {
        Target {
            id,
            token: sub.token,
            sink: sub.sink.clone(),
            delivered: sub.delivered.clone(),
        }
    }

    /// Addresses `message` to every subscriber.
    pub fn broadcast(&self, seq: u64, message: M) -> Outgoing<M> {
        Outgoing {
            seq,
            message,
            targets: self
                .subscribers
                .iter()
                .map(|(id, sub)| Self::target(*id, sub))
                .collect(),
        }
    }

    /// Addresses `message` to `id` only.
    pub fn unicast(&self, id: SubscriberId, seq: u64, message: M) -> Option<Outgoing<M>> {
        let sub = self.subscribers.get(&id)?;
        Some(Outgoing {
            seq,
            message,
            targets: vec![Self::target(id, sub)],
        })
    }
}

/// Serializes deliveries of one entry.
///
/// Sequence numbers are compared per subscriber, so no subscriber sees an
/// older message after a newer one. The lock is reentrant: a sink may
/// attach to or update the entry that is delivering to it.
pub(crate) struct Dispatcher {
    lock: ReentrantMutex<()>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            lock: ReentrantMutex::new(()),
        }
    }

    /// Delivers `outgoing`, skipping targets for which `is_current` says the
    /// attachment is gone.
    pub fn dispatch<M>(&self, outgoing: Outgoing<M>, is_current: impl Fn(SubscriberId, u64) -> bool) {
        let _guard = self.lock.lock();
        for target in &outgoing.targets {
            if !is_current(target.id, target.token) {
                continue;
            }
            if target.delivered.load(Ordering::SeqCst) >= outgoing.seq {
                continue;
            }
            target.delivered.store(outgoing.seq, Ordering::SeqCst);
            (target.sink)(&outgoing.message);
        }
    }
}
