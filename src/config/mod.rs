#[allow(clippy::module_inception)]
mod config;

pub use self::config::{IngestionSettings, PostgresSettings, ServerSettings, Settings, UpstreamSettings};
