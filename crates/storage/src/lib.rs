//! Quarry Storage - backing-store boundary and reference stores.
//!
//! This crate provides the storage side of Quarry:
//!
//! - `BackingStore` / `RowCursor`: The boundary the reactive layer reads through
//! - `ObserverRegistry`: Per-target change notification routing
//! - `MemoryStore`: In-memory tables with selection, ordering and projection
//! - `WriteBackStringCache`: Character-bounded write-back cache for strings
//! - `StringPersistence`: Durable key/value string storage behind that cache
//!
//! # Example
//!
//! ```rust
//! use quarry_core::QueryDescriptor;
//! use quarry_storage::{BackingStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.create_table("contacts", ["name", "age"]).unwrap();
//! store.insert("contacts", vec!["Alice".into(), 30.into()]).unwrap();
//! store.insert("contacts", vec!["Bob".into(), 17.into()]).unwrap();
//!
//! let query = QueryDescriptor::new("contacts")
//!     .selection("age >= ?")
//!     .arg(18);
//! let mut cursor = store.query(&query).unwrap().unwrap();
//! assert_eq!(cursor.count(), 1);
//! assert_eq!(cursor.row(0).unwrap().get_str("name"), Some("Alice"));
//! cursor.close().unwrap();
//! ```

pub mod cursor;
pub mod memory;
pub mod notify;
pub mod persistence;
pub mod selection;
pub mod string_cache;

pub use cursor::{BackingStore, ChangeCallback, ObserverId, RowCursor};
pub use memory::{MemoryCursor, MemoryStore};
pub use notify::ObserverRegistry;
pub use persistence::{DirectoryPersistence, MemoryPersistence, StringPersistence};
pub use selection::{compile_order_by, compile_selection, CompareOp, OrderBy, Predicate, SortOrder};
pub use string_cache::{StringCacheConfig, WriteBackStringCache, DEFAULT_MAX_CHARS};
