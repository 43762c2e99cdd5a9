//! Backing-store boundary.
//!
//! The reactive layer only ever talks to storage through these two traits:
//! a `BackingStore` turns a `QueryDescriptor` into a `RowCursor`, and the
//! cursor gives random access to its rows and lets callers watch the data it
//! was read from.

use quarry_core::{QueryDescriptor, Result, Row};
use std::sync::Arc;

/// Identifier returned when registering a change observer.
pub type ObserverId = u64;

/// Callback invoked when data behind a cursor may have changed.
///
/// Invoked on whichever thread performed the write, never while a store
/// lock is held.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// A row cursor returned by a backing store.
///
/// A cursor is an exclusively-owned resource: whoever holds it must call
/// [`RowCursor::close`] exactly once when done. Closing twice is harmless.
pub trait RowCursor: Send {
    /// Number of rows in the result.
    fn count(&self) -> usize;

    /// Reads the row at `index`.
    ///
    /// Fails with `RowOutOfRange` past the end and `ResourceClosed` after
    /// the cursor was closed.
    fn row(&mut self, index: usize) -> Result<Row>;

    /// Registers `callback` against the data this cursor was read from.
    ///
    /// Changes made by this process are delivered like any other change.
    fn register_observer(&mut self, callback: ChangeCallback) -> ObserverId;

    /// Unregisters an observer. Unknown IDs are ignored.
    fn unregister_observer(&mut self, id: ObserverId);

    /// Releases the underlying resource and every observer registered on it.
    fn close(&mut self) -> Result<()>;

    /// Returns true once the cursor was closed.
    fn is_closed(&self) -> bool;
}

/// A store that can be read through query descriptors.
pub trait BackingStore: Send + Sync {
    /// Runs `descriptor`.
    ///
    /// `Ok(None)` means the store has no data for the request (absent or
    /// not readable); errors are `SourceUnavailable` or `MalformedQuery`.
    fn query(&self, descriptor: &QueryDescriptor) -> Result<Option<Box<dyn RowCursor>>>;
}

impl<S: BackingStore + ?Sized> BackingStore for Arc<S> {
    fn query(&self, descriptor: &QueryDescriptor) -> Result<Option<Box<dyn RowCursor>>> {
        (**self).query(descriptor)
    }
}
