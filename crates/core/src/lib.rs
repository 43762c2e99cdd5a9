//! Quarry Core - shared types for the Quarry reactive data-access layer.
//!
//! This crate provides the foundational types used by every other crate:
//!
//! - `Value`: A cell value as exposed by row cursors (Null, Integer, Real, Text, Blob)
//! - `Row`: One materialized row with its column names
//! - `QueryDescriptor`: Immutable description of a read against a backing store
//! - `OrderedMap`: Insertion-ordered map backing the bounded caches
//! - `Error`: Error types shared across the workspace
//!
//! # Example
//!
//! ```rust
//! use quarry_core::{columns, QueryDescriptor, Row, Value};
//!
//! let query = QueryDescriptor::new("contacts")
//!     .projection(["name", "age"])
//!     .selection("age >= ?")
//!     .arg(18)
//!     .sort_order("name");
//!
//! assert_eq!(query.target(), "contacts");
//!
//! let row = Row::new(1, columns(["name", "age"]), vec![
//!     Value::from("Alice"),
//!     Value::Integer(30),
//! ]);
//! assert_eq!(row.get_str("name"), Some("Alice"));
//! ```

mod descriptor;
mod error;
mod ordered;
mod row;
mod value;

pub use descriptor::QueryDescriptor;
pub use error::{Error, Result};
pub use ordered::OrderedMap;
pub use row::{columns, Columns, Row, RowId};
pub use value::Value;
