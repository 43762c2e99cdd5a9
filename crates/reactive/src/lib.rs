//! Quarry Reactive - lifecycle-bound reactive queries and caches.
//!
//! This crate loads query results from a changeable backing store and keeps
//! them live for as long as someone is watching:
//!
//! - `ReactiveQuery`: Fetches on first attach, refetches on change, releases on last detach
//! - `Snapshot` / `Parser`: One closeable result set and the typed accessor for its rows
//! - `FetchExecutor` / `TaskPool`: Cancellable fetches off the caller's thread
//! - `ChangeWatcher`: The single change observer armed on the live snapshot
//! - `LifetimeScope`: The host's signal that a subscriber is gone
//! - `ReactiveValue`: A settable value with the same subscription contract
//! - `BoundedReactiveCache`: Keyed entries with idle-only, capacity-driven eviction
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use quarry_core::{QueryDescriptor, Row};
//! use quarry_reactive::{Delivery, FetchExecutor, LifetimeScope, ManualPool, ReactiveQuery};
//! use quarry_storage::MemoryStore;
//!
//! let store = MemoryStore::new();
//! store.create_table("contacts", ["name"]).unwrap();
//! store.insert("contacts", vec!["Alice".into()]).unwrap();
//!
//! let pool = Arc::new(ManualPool::new());
//! let executor = FetchExecutor::new(Arc::new(store.clone()), pool.clone());
//! let query = ReactiveQuery::new(
//!     QueryDescriptor::new("contacts"),
//!     |row: &Row| row.get_str("name").unwrap_or_default().to_string(),
//!     executor,
//! );
//!
//! let scope = LifetimeScope::new();
//! query.attach(1, &scope, |delivery: &Delivery<String>| {
//!     if let Some(snapshot) = delivery.snapshot() {
//!         println!("{:?}", snapshot.to_vec());
//!     }
//! }).unwrap();
//!
//! pool.run_all();
//! assert_eq!(query.current_value().unwrap().unwrap().len(), 1);
//!
//! // Ending the scope detaches; the snapshot is released.
//! scope.end();
//! assert!(query.current_value().unwrap().is_none());
//! ```

pub mod cache;
pub mod executor;
pub mod pool;
pub mod query;
pub mod scope;
pub mod snapshot;
pub mod subscription;
pub mod value;
pub mod watcher;

pub use cache::{BoundedReactiveCache, CacheConfig, Reactive, DEFAULT_CAPACITY};
pub use executor::{FetchExecutor, FetchOutcome, FetchTicket};
pub use pool::{ManualPool, PoolConfig, RuntimePool, Task, TaskPool};
pub use query::{QueryOptions, QueryState, QueryStats, ReactiveQuery};
pub use scope::{LifetimeScope, ListenerId};
pub use snapshot::{Parser, Snapshot};
pub use subscription::{Delivery, IdleHook, Sink, SubscriberId};
pub use value::ReactiveValue;
pub use watcher::ChangeWatcher;
