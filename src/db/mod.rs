use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{IngestError, QueryError};

pub mod models;
pub mod postgres;

pub use postgres::PostgresClient;

use models::{StoredHour, TokenHour};

/// Write side of the store: the only commit boundary in the service.
#[async_trait]
pub trait HourDataSink: Send + Sync {
    /// Upsert one upstream page and the token metadata of its last record,
    /// atomically. An empty slice is a no-op.
    async fn upsert_hours(&self, hours: &[TokenHour]) -> Result<(), IngestError>;
}

/// Read side of the store, used by the range query engine.
#[async_trait]
pub trait HourDataReader: Send + Sync {
    /// Every stored bucket for `symbol`, ascending by timestamp.
    async fn token_hours(&self, symbol: &str) -> Result<Vec<StoredHour>, QueryError>;
}

#[async_trait]
impl<T: HourDataSink + ?Sized> HourDataSink for Arc<T> {
    async fn upsert_hours(&self, hours: &[TokenHour]) -> Result<(), IngestError> {
        (**self).upsert_hours(hours).await
    }
}

#[async_trait]
impl<T: HourDataReader + ?Sized> HourDataReader for Arc<T> {
    async fn token_hours(&self, symbol: &str) -> Result<Vec<StoredHour>, QueryError> {
        (**self).token_hours(symbol).await
    }
}
