//! Error types for Quarry.

use thiserror::Error;

/// Result type alias for Quarry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Quarry operations.
///
/// `Error` is `Clone` because one failed fetch is delivered to every
/// subscriber of the query that issued it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// The backing store could not be reached or opened.
    #[error("source unavailable for {target}: {message}")]
    SourceUnavailable { target: String, message: String },

    /// The store rejected the query descriptor.
    #[error("malformed query: {message}")]
    MalformedQuery { message: String },

    /// Operation attempted on a destroyed query or a closed snapshot/cursor.
    #[error("{resource} is closed")]
    ResourceClosed { resource: &'static str },

    /// Random access past the end of a cursor.
    #[error("row {index} out of range (count {count})")]
    RowOutOfRange { index: usize, count: usize },

    /// Reading or writing persisted data failed.
    #[error("persistence failed for key {key}: {message}")]
    Persistence { key: String, message: String },
}

impl Error {
    /// Creates a source unavailable error.
    pub fn source_unavailable(target: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SourceUnavailable {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed query error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedQuery {
            message: message.into(),
        }
    }

    /// Creates a resource closed error.
    pub fn closed(resource: &'static str) -> Self {
        Error::ResourceClosed { resource }
    }

    /// Creates a row out of range error.
    pub fn row_out_of_range(index: usize, count: usize) -> Self {
        Error::RowOutOfRange { index, count }
    }

    /// Creates a persistence error.
    pub fn persistence(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Persistence {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true for the `ResourceClosed` sentinel.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ResourceClosed { .. })
    }
}
