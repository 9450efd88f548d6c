//! Error taxonomy for the ingestion and query paths.
//!
//! Every [`IngestError`] is recoverable: the scheduler catches it per token,
//! logs it, and retries the same watermark on the next pass.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The data source could not be reached (connect failure, timeout, body read).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] reqwest::Error),

    /// The data source answered but reported in-band errors.
    #[error("upstream query failed: {}", .0.join("; "))]
    UpstreamQuery(Vec<String>),

    /// A fetched record is missing fields or fails numeric parsing.
    /// The whole page is dropped.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// The store rejected the write; the transaction was rolled back.
    #[error("persistence failed: {0}")]
    Persistence(#[source] BoxError),
}

impl From<tokio_postgres::Error> for IngestError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Persistence(Box::new(e))
    }
}

impl From<deadpool_postgres::PoolError> for IngestError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Persistence(Box::new(e))
    }
}

/// Failure on the read path. Surfaced to HTTP callers as a 500.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("storage read failed: {0}")]
    Storage(#[source] BoxError),
}

impl From<tokio_postgres::Error> for QueryError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

impl From<deadpool_postgres::PoolError> for QueryError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Storage(Box::new(e))
    }
}
