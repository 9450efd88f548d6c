pub mod config;
pub mod db;
pub mod error;
pub mod query;
pub mod server;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod testing;

pub use crate::config::Settings;
pub use db::PostgresClient;
pub use error::{IngestError, QueryError};
pub use query::RangeQueryEngine;
pub use worker::{IngestionScheduler, SubgraphClient};
