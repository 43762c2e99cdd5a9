//! Fetch results and the row parsers that read them.

use parking_lot::Mutex;
use quarry_core::{Error, Result, Row};
use quarry_storage::{ChangeCallback, ObserverId, RowCursor};
use std::fmt;
use std::sync::Arc;

/// Converts one row into a domain value.
///
/// Parsers are stateless and shared by every snapshot of a query. Any
/// `Fn(&Row) -> T` closure is a parser.
pub trait Parser<T>: Send + Sync {
    fn parse(&self, row: &Row) -> T;
}

impl<T, F> Parser<T> for F
where
    F: Fn(&Row) -> T + Send + Sync,
{
    fn parse(&self, row: &Row) -> T {
        self(row)
    }
}

/// One fetched result set plus the parser used to read it.
///
/// The snapshot exclusively owns its cursor. Reads go through an internal
/// lock so a snapshot can be handed to subscribers on any thread. Once
/// closed every read fails with `ResourceClosed`.
pub struct Snapshot<T> {
    generation: u64,
    count: usize,
    cursor: Mutex<Option<Box<dyn RowCursor>>>,
    parser: Arc<dyn Parser<T>>,
}

impl<T> Snapshot<T> {
    /// Wraps a freshly opened cursor.
    pub fn new(generation: u64, cursor: Box<dyn RowCursor>, parser: Arc<dyn Parser<T>>) -> Self {
        Self {
            generation,
            count: cursor.count(),
            cursor: Mutex::new(Some(cursor)),
            parser,
        }
    }

    /// The fetch this snapshot came from. Increases with every fetch of the
    /// same query.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of rows, zero once closed.
    pub fn len(&self) -> usize {
        if self.is_closed() {
            0
        } else {
            self.count
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses the row at `index`.
    pub fn get(&self, index: usize) -> Result<T> {
        let row = self.row(index)?;
        Ok(self.parser.parse(&row))
    }

    /// Reads the raw row at `index`.
    pub fn row(&self, index: usize) -> Result<Row> {
        let mut cursor = self.cursor.lock();
        let cursor = cursor.as_mut().ok_or_else(|| Error::closed("snapshot"))?;
        if index >= self.count {
            return Err(Error::row_out_of_range(index, self.count));
        }
        cursor.row(index)
    }

    /// Parses every row.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut cursor = self.cursor.lock();
        let cursor = cursor.as_mut().ok_or_else(|| Error::closed("snapshot"))?;
        let mut out = Vec::with_capacity(self.count);
        for i in 0..self.count {
            out.push(self.parser.parse(&cursor.row(i)?));
        }
        Ok(out)
    }

    /// Returns true once the snapshot was closed.
    pub fn is_closed(&self) -> bool {
        self.cursor.lock().is_none()
    }

    /// Closes the underlying cursor.
    ///
    /// Returns true if this call released it. A cursor that fails to close
    /// is logged and dropped anyway.
    pub fn close(&self) -> bool {
        let Some(mut cursor) = self.cursor.lock().take() else {
            return false;
        };
        if let Err(e) = cursor.close() {
            tracing::warn!(generation = self.generation, error = %e, "failed to close snapshot cursor");
        }
        tracing::trace!(generation = self.generation, "snapshot closed");
        true
    }

    pub(crate) fn register_observer(&self, callback: ChangeCallback) -> Result<ObserverId> {
        let mut cursor = self.cursor.lock();
        let cursor = cursor.as_mut().ok_or_else(|| Error::closed("snapshot"))?;
        Ok(cursor.register_observer(callback))
    }

    pub(crate) fn unregister_observer(&self, id: ObserverId) {
        if let Some(cursor) = self.cursor.lock().as_mut() {
            cursor.unregister_observer(id);
        }
    }
}

impl<T> Drop for Snapshot<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("generation", &self.generation)
            .field("count", &self.count)
            .field("closed", &self.is_closed())
            .finish()
    }
}
