//! Reactive queries.
//!
//! A `ReactiveQuery` owns one logical query against a backing store. The
//! first subscriber starts a fetch; the resulting snapshot is delivered to
//! every subscriber and a change watcher is armed on it. A change
//! notification starts a refetch whose snapshot replaces the old one, which
//! is closed only after the replacement was delivered. When the last
//! subscriber leaves, the snapshot is closed and any fetch still running is
//! cancelled.
//!
//! Every state transition runs under the query's lock. Side effects that
//! may call back into user code (deliveries, closing cursors, launching a
//! fetch, the idle hook) are collected while the lock is held and applied
//! after it is released.

use crate::executor::{FetchExecutor, FetchOutcome, FetchTicket};
use crate::scope::{LifetimeScope, ListenerId};
use crate::snapshot::{Parser, Snapshot};
use crate::subscription::{Delivery, Dispatcher, IdleHook, Outgoing, Sink, SubscriberId, SubscriberSet};
use crate::watcher::ChangeWatcher;
use parking_lot::Mutex;
use quarry_core::{Error, QueryDescriptor, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-query options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Arm a change watcher on each snapshot. When off, the query loads
    /// once per attachment cycle and only `refresh` fetches again.
    pub watch_changes: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            watch_changes: true,
        }
    }
}

/// Where a query is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryState {
    /// No subscribers and no snapshot.
    Idle,
    /// First fetch in flight, no snapshot yet.
    Fetching,
    /// Snapshot held and watched.
    Live,
    /// Snapshot held while a newer fetch is in flight.
    Refetching,
    /// Subscribers present but the last fetch failed or found no data.
    Unwatched,
    /// Torn down for good.
    Destroyed,
}

/// Counters describing what a query has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub fetches_started: u64,
    pub snapshots_published: u64,
    /// Change notifications (and refreshes) folded into a pending refetch.
    pub notifications_coalesced: u64,
    /// Fetch results closed without being published.
    pub results_discarded: u64,
}

struct Inner<T> {
    destroyed: bool,
    subscribers: SubscriberSet<Delivery<T>>,
    snapshot: Option<Arc<Snapshot<T>>>,
    watcher: ChangeWatcher<T>,
    in_flight: Option<FetchTicket>,
    refetch_pending: bool,
    /// Latest broadcast and its sequence number, replayed to late attachers.
    latest: Option<(u64, Delivery<T>)>,
    next_seq: u64,
    next_generation: u64,
    stats: QueryStats,
}

impl<T> Inner<T> {
    fn state(&self) -> QueryState {
        if self.destroyed {
            return QueryState::Destroyed;
        }
        if self.subscribers.is_empty() {
            return QueryState::Idle;
        }
        match (&self.snapshot, &self.in_flight) {
            (None, Some(_)) => QueryState::Fetching,
            (Some(_), None) => QueryState::Live,
            (Some(_), Some(_)) => QueryState::Refetching,
            (None, None) => QueryState::Unwatched,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Side effects collected under the lock.
struct Effects<T> {
    deliveries: Vec<Outgoing<Delivery<T>>>,
    launch: Option<FetchTicket>,
    close: Vec<Arc<Snapshot<T>>>,
    listeners: Vec<(LifetimeScope, ListenerId)>,
    went_idle: bool,
}

impl<T> Effects<T> {
    fn new() -> Self {
        Self {
            deliveries: Vec::new(),
            launch: None,
            close: Vec::new(),
            listeners: Vec::new(),
            went_idle: false,
        }
    }
}

struct Shared<T> {
    descriptor: QueryDescriptor,
    parser: Arc<dyn Parser<T>>,
    executor: FetchExecutor,
    options: QueryOptions,
    inner: Mutex<Inner<T>>,
    dispatcher: Dispatcher,
    idle_hook: Mutex<Option<IdleHook>>,
}

/// A live-updating query result shared by many subscribers.
///
/// Cloning yields another handle to the same query.
pub struct ReactiveQuery<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ReactiveQuery<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: 'static> ReactiveQuery<T> {
    /// Creates an idle query. Nothing is fetched until someone attaches.
    pub fn new<P>(descriptor: QueryDescriptor, parser: P, executor: FetchExecutor) -> Self
    where
        P: Parser<T> + 'static,
    {
        Self::with_options(descriptor, parser, executor, QueryOptions::default())
    }

    pub fn with_options<P>(
        descriptor: QueryDescriptor,
        parser: P,
        executor: FetchExecutor,
        options: QueryOptions,
    ) -> Self
    where
        P: Parser<T> + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                descriptor,
                parser: Arc::new(parser),
                executor,
                options,
                inner: Mutex::new(Inner {
                    destroyed: false,
                    subscribers: SubscriberSet::new(),
                    snapshot: None,
                    watcher: ChangeWatcher::new(),
                    in_flight: None,
                    refetch_pending: false,
                    latest: None,
                    next_seq: 0,
                    next_generation: 0,
                    stats: QueryStats::default(),
                }),
                dispatcher: Dispatcher::new(),
                idle_hook: Mutex::new(None),
            }),
        }
    }

    /// The descriptor this query runs.
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.shared.descriptor
    }

    pub fn state(&self) -> QueryState {
        self.shared.inner.lock().state()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.inner.lock().subscribers.len()
    }

    pub fn stats(&self) -> QueryStats {
        self.shared.inner.lock().stats
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    /// Starts delivering to `sink` until `scope` ends or `detach(id)`.
    ///
    /// The first subscriber starts a fetch. A later subscriber is sent the
    /// latest delivery right away, unless the first fetch is still running,
    /// in which case it waits for it like everyone else.
    ///
    /// Returns `Ok(false)` if `id` is already attached or `scope` already
    /// ended, and `ResourceClosed` once the query was destroyed.
    pub fn attach<F>(&self, id: SubscriberId, scope: &LifetimeScope, sink: F) -> Result<bool>
    where
        F: Fn(&Delivery<T>) + Send + Sync + 'static,
    {
        let sink: Sink<Delivery<T>> = Arc::new(sink);
        let mut effects = Effects::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return Err(Error::closed("reactive query"));
            }
            if inner.subscribers.contains(id) {
                return Ok(false);
            }
            let token = inner.subscribers.next_token();
            let weak = Arc::downgrade(&self.shared);
            let listener = scope.on_end(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.detach(id, Some(token));
                }
            });
            let Some(listener) = listener else {
                return Ok(false);
            };

            let was_empty = inner.subscribers.is_empty();
            inner
                .subscribers
                .insert(id, token, sink, scope.clone(), listener);
            tracing::debug!(
                target = %self.shared.descriptor.target(),
                subscriber = id,
                subscribers = inner.subscribers.len(),
                "subscriber attached"
            );

            if was_empty {
                self.shared.start_fetch(&mut inner, &mut effects);
            } else if inner.snapshot.is_some() || inner.in_flight.is_none() {
                if let Some((seq, latest)) = inner.latest.clone() {
                    if let Some(out) = inner.subscribers.unicast(id, seq, latest) {
                        effects.deliveries.push(out);
                    }
                }
            }
        }
        self.shared.apply(effects);
        Ok(true)
    }

    /// Stops delivering to `id`. Unknown IDs are ignored.
    ///
    /// Returns true if `id` was attached.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.shared.detach(id, None)
    }

    /// The snapshot currently held, without attaching.
    pub fn current_value(&self) -> Result<Option<Arc<Snapshot<T>>>> {
        let inner = self.shared.inner.lock();
        if inner.destroyed {
            return Err(Error::closed("reactive query"));
        }
        Ok(inner.snapshot.clone())
    }

    /// Fetches again as if the data had changed.
    ///
    /// Folded into the running fetch if there is one. Does nothing while
    /// nobody is attached.
    pub fn refresh(&self) -> Result<()> {
        let mut effects = Effects::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return Err(Error::closed("reactive query"));
            }
            if inner.subscribers.is_empty() {
                return Ok(());
            }
            self.shared.request_fetch(&mut inner, &mut effects);
        }
        self.shared.apply(effects);
        Ok(())
    }

    /// Tears the query down: closes the snapshot, disarms the watcher,
    /// cancels the running fetch and drops every subscriber.
    pub fn destroy(&self) {
        let mut effects = Effects::new();
        {
            let mut inner = self.shared.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            effects.listeners = inner.subscribers.drain();
            self.shared.release(&mut inner, &mut effects);
            tracing::debug!(target = %self.shared.descriptor.target(), "query destroyed");
        }
        self.shared.apply(effects);
    }

    /// Installs (or clears) the hook run when the last subscriber leaves.
    pub fn set_idle_hook(&self, hook: Option<IdleHook>) {
        *self.shared.idle_hook.lock() = hook;
    }
}

impl<T: 'static> Shared<T> {
    fn detach(self: &Arc<Self>, id: SubscriberId, token: Option<u64>) -> bool {
        let mut effects = Effects::new();
        {
            let mut inner = self.inner.lock();
            let Some(listener) = inner.subscribers.remove(id, token) else {
                return false;
            };
            if token.is_none() {
                effects.listeners.push(listener);
            }
            tracing::debug!(
                target = %self.descriptor.target(),
                subscriber = id,
                subscribers = inner.subscribers.len(),
                "subscriber detached"
            );
            if inner.subscribers.is_empty() && !inner.destroyed {
                self.release(&mut inner, &mut effects);
            }
        }
        self.apply(effects);
        true
    }

    /// Drops everything the query holds and goes idle.
    fn release(&self, inner: &mut Inner<T>, effects: &mut Effects<T>) {
        if let Some(ticket) = inner.in_flight.take() {
            ticket.cancel();
        }
        inner.refetch_pending = false;
        inner.watcher.disarm();
        effects.close.extend(inner.snapshot.take());
        inner.latest = None;
        effects.went_idle = true;
    }

    fn start_fetch(&self, inner: &mut Inner<T>, effects: &mut Effects<T>) {
        inner.next_generation += 1;
        let ticket = FetchTicket::new(inner.next_generation);
        inner.in_flight = Some(ticket.clone());
        inner.stats.fetches_started += 1;
        tracing::debug!(
            target = %self.descriptor.target(),
            generation = ticket.id(),
            "starting fetch"
        );
        effects.launch = Some(ticket);
    }

    /// Starts a fetch, or folds the request into the running one.
    fn request_fetch(&self, inner: &mut Inner<T>, effects: &mut Effects<T>) {
        if inner.in_flight.is_some() {
            inner.refetch_pending = true;
            inner.stats.notifications_coalesced += 1;
            tracing::debug!(target = %self.descriptor.target(), "refetch coalesced");
        } else {
            self.start_fetch(inner, effects);
        }
    }

    fn launch(self: &Arc<Self>, ticket: FetchTicket) {
        let weak = Arc::downgrade(self);
        let id = ticket.id();
        self.executor.execute(
            self.descriptor.clone(),
            self.parser.clone(),
            ticket,
            move |outcome| match weak.upgrade() {
                Some(shared) => shared.complete(id, outcome),
                None => {
                    if let FetchOutcome::Ready(Ok(Some(snapshot))) = outcome {
                        snapshot.close();
                    }
                }
            },
        );
    }

    /// Handles the end of fetch `generation`.
    fn complete(self: &Arc<Self>, generation: u64, outcome: FetchOutcome<T>) {
        let mut effects = Effects::new();
        {
            let mut inner = self.inner.lock();
            let current = inner.in_flight.as_ref().map(FetchTicket::id) == Some(generation);
            let outcome = match outcome {
                FetchOutcome::Ready(result) if current => result,
                FetchOutcome::Ready(result) => {
                    if let Ok(Some(snapshot)) = result {
                        effects.close.push(Arc::new(snapshot));
                    }
                    inner.stats.results_discarded += 1;
                    tracing::debug!(generation, "stale fetch result discarded");
                    drop(inner);
                    self.apply(effects);
                    return;
                }
                FetchOutcome::Cancelled => {
                    inner.stats.results_discarded += 1;
                    return;
                }
            };
            inner.in_flight = None;

            match outcome {
                Ok(Some(snapshot)) => self.publish(&mut inner, Arc::new(snapshot), &mut effects),
                Ok(None) => {
                    tracing::debug!(target = %self.descriptor.target(), generation, "store has no data");
                    inner.watcher.disarm();
                    effects.close.extend(inner.snapshot.take());
                    self.broadcast(&mut inner, Delivery::Empty, true, &mut effects);
                }
                Err(e) => {
                    tracing::warn!(
                        target = %self.descriptor.target(),
                        generation,
                        error = %e,
                        "fetch failed"
                    );
                    // A held snapshot stays servable; only the failure is new.
                    let keep_latest = inner.snapshot.is_none();
                    self.broadcast(&mut inner, Delivery::Failed(e), keep_latest, &mut effects);
                }
            }

            if inner.refetch_pending {
                inner.refetch_pending = false;
                self.start_fetch(&mut inner, &mut effects);
            }
        }
        self.apply(effects);
    }

    fn publish(self: &Arc<Self>, inner: &mut Inner<T>, snapshot: Arc<Snapshot<T>>, effects: &mut Effects<T>) {
        let generation = snapshot.generation();
        if self.options.watch_changes {
            let weak = Arc::downgrade(self);
            let armed = inner.watcher.arm(
                &snapshot,
                Arc::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_change(generation);
                    }
                }),
            );
            if let Err(e) = armed {
                tracing::warn!(generation, error = %e, "could not watch snapshot");
            }
        } else {
            inner.watcher.disarm();
        }
        // The old snapshot is closed after the new one is delivered.
        effects.close.extend(inner.snapshot.replace(snapshot.clone()));
        inner.stats.snapshots_published += 1;
        tracing::debug!(target = %self.descriptor.target(), generation, rows = snapshot.len(), "snapshot published");
        self.broadcast(inner, Delivery::Loaded(snapshot), true, effects);
    }

    fn broadcast(
        &self,
        inner: &mut Inner<T>,
        delivery: Delivery<T>,
        keep_latest: bool,
        effects: &mut Effects<T>,
    ) {
        let seq = inner.next_seq();
        if keep_latest {
            inner.latest = Some((seq, delivery.clone()));
        }
        effects.deliveries.push(inner.subscribers.broadcast(seq, delivery));
    }

    /// Change callback of the watcher armed on snapshot `generation`.
    ///
    /// A notification may reach a watcher that was superseded after the
    /// store queued it. The newer snapshot may predate the write, so it
    /// still counts as a change while a snapshot is held.
    fn on_change(self: &Arc<Self>, generation: u64) {
        let mut effects = Effects::new();
        {
            let mut inner = self.inner.lock();
            let Some(current) = inner.snapshot.as_ref().map(|s| s.generation()) else {
                tracing::trace!(generation, "ignoring change notification, nothing held");
                return;
            };
            if inner.destroyed || inner.subscribers.is_empty() {
                return;
            }
            if current != generation {
                tracing::trace!(generation, current, "change seen by superseded watcher");
            }
            self.request_fetch(&mut inner, &mut effects);
        }
        self.apply(effects);
    }

    fn apply(self: &Arc<Self>, effects: Effects<T>) {
        for outgoing in effects.deliveries {
            self.dispatcher.dispatch(outgoing, |id, token| {
                self.inner.lock().subscribers.is_current(id, token)
            });
        }
        for snapshot in effects.close {
            snapshot.close();
        }
        for (scope, listener) in effects.listeners {
            scope.remove_listener(listener);
        }
        if let Some(ticket) = effects.launch {
            self.launch(ticket);
        }
        if effects.went_idle {
            tracing::debug!(target = %self.descriptor.target(), "query idle");
            let hook = self.idle_hook.lock().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(ticket) = inner.in_flight.take() {
            ticket.cancel();
        }
        inner.watcher.disarm();
        if let Some(snapshot) = inner.snapshot.take() {
            snapshot.close();
        }
    }
}
