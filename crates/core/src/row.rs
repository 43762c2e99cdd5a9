//! Row structure for Quarry.
//!
//! A `Row` is one materialized record read from a cursor. Rows produced by
//! the same cursor share a single column-name list.

use crate::value::Value;
use std::sync::Arc;

/// Unique identifier for a row inside its table.
pub type RowId = u64;

/// Shared, ordered list of column names.
pub type Columns = Arc<[String]>;

/// A row read from a backing store.
#[derive(Clone, Debug)]
pub struct Row {
    /// Identifier assigned by the store.
    id: RowId,
    /// Column names, positionally matching `values`.
    columns: Columns,
    /// Values indexed by column position.
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row with the given ID, column names and values.
    pub fn new(id: RowId, columns: Columns, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self {
            id,
            columns,
            values,
        }
    }

    /// Returns the row ID.
    #[inline]
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Returns the column names.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns a reference to the values.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the position of `column`, if present.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Gets a value at the given column index.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.column_index(column).and_then(|i| self.values.get(i))
    }

    /// Gets an integer column, `None` if absent or not an integer.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    /// Gets a text column, `None` if absent or not text.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// Returns the number of values in this row.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.columns == other.columns && self.values == other.values
    }
}

/// Builds a shared column list from anything iterable over string-likes.
pub fn columns<I, S>(names: I) -> Columns
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect::<Vec<_>>().into()
}
