//! Error types for the vector store and the object store.
//!
//! Application code (engine, rendering, CLI) works in `anyhow::Result`; these
//! enums exist so callers can tell a transient outage from a rejected record.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached or failed mid-operation.
    /// Never retried here; the next scheduled tick is the retry.
    #[error("store unavailable: {0}")]
    Connectivity(String),

    /// Malformed record or filter. Retrying will not help.
    #[error("invalid record: {0}")]
    Validation(String),

    /// A batch upsert stopped part way. Every member is idempotent by id, so
    /// the recovery is to retry the whole batch.
    #[error("batch upsert failed after {written} of {total} records: {reason}")]
    PartialBatch {
        written: usize,
        total: usize,
        reason: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Connectivity(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("object {container}/{name} not found")]
    NotFound { container: String, name: String },

    #[error("object store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;
