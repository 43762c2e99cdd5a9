//! Asynchronous, cancellable fetches.

use crate::pool::TaskPool;
use crate::snapshot::{Parser, Snapshot};
use quarry_core::{QueryDescriptor, Result};
use quarry_storage::BackingStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifies one fetch and carries its cancellation flag.
#[derive(Clone, Debug)]
pub struct FetchTicket {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl FetchTicket {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The fetch ID, also used as the generation of the resulting snapshot.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the fetch as unwanted. Its result will be closed, not published.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How a fetch ended.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    /// The fetch ran and nobody cancelled it. `Ok(None)` means the store
    /// had no data.
    Ready(Result<Option<Snapshot<T>>>),
    /// The fetch was cancelled; any snapshot it produced is already closed.
    Cancelled,
}

/// Runs fetches for descriptors on a task pool.
#[derive(Clone)]
pub struct FetchExecutor {
    store: Arc<dyn BackingStore>,
    pool: Arc<dyn TaskPool>,
}

impl FetchExecutor {
    pub fn new(store: Arc<dyn BackingStore>, pool: Arc<dyn TaskPool>) -> Self {
        Self { store, pool }
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Runs `descriptor` on the pool and hands the outcome to `on_complete`
    /// on the worker thread.
    ///
    /// The cancellation flag is checked once the store returns, right
    /// before publishing. A cancelled fetch still runs to completion.
    pub fn execute<T, F>(
        &self,
        descriptor: QueryDescriptor,
        parser: Arc<dyn Parser<T>>,
        ticket: FetchTicket,
        on_complete: F,
    ) where
        T: 'static,
        F: FnOnce(FetchOutcome<T>) + Send + 'static,
    {
        let store = self.store.clone();
        self.pool.spawn(Box::new(move || {
            let outcome = fetch(&*store, &descriptor, parser, ticket.id());
            if ticket.is_cancelled() {
                if let Ok(Some(snapshot)) = &outcome {
                    snapshot.close();
                }
                tracing::debug!(
                    target = %descriptor.target(),
                    generation = ticket.id(),
                    "fetch cancelled, result discarded"
                );
                on_complete(FetchOutcome::Cancelled);
                return;
            }
            on_complete(FetchOutcome::Ready(outcome));
        }));
    }
}

fn fetch<T>(
    store: &dyn BackingStore,
    descriptor: &QueryDescriptor,
    parser: Arc<dyn Parser<T>>,
    generation: u64,
) -> Result<Option<Snapshot<T>>> {
    let cursor = store.query(descriptor)?;
    Ok(cursor.map(|cursor| Snapshot::new(generation, cursor, parser)))
}
