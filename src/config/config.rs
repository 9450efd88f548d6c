use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Token metadata (one row per symbol)
/// - Hourly open/close/high/low/price buckets
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    #[serde(default = "default_postgres_host")]
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    #[serde(default = "default_postgres_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_postgres_database")]
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_postgres_host(),
            port: default_postgres_port(),
            user: default_postgres_user(),
            password: String::new(),
            database: default_postgres_database(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_user() -> String {
    "postgres".to_string()
}

fn default_postgres_database() -> String {
    "tidemark".to_string()
}

fn default_pool_size() -> usize {
    16
}

/// Subgraph (GraphQL) data source configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Token addresses tracked by the ingestion loop
    #[serde(default = "default_tokens")]
    pub tokens: Vec<String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            tokens: default_tokens(),
        }
    }
}

fn default_upstream_url() -> String {
    "https://api.thegraph.com/subgraphs/name/uniswap/uniswap-v3".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// WBTC, SHIB and GNO on Ethereum mainnet.
fn default_tokens() -> Vec<String> {
    vec![
        "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599".to_string(),
        "0x95ad61b0a150d79219dcf64e1e6cc01f0b64c4ce".to_string(),
        "0x6810e776880c02933d47db1b9fc05908e5386b96".to_string(),
    ]
}

/// Prefetch/poll cadence configuration.
///
/// The loop runs at `prefetch_interval_secs` while backfilling and switches
/// to `poll_interval_secs` once a full pass makes no forward progress.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestionSettings {
    #[serde(default = "default_prefetch_interval")]
    pub prefetch_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How far back the first pass starts, in days
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            prefetch_interval_secs: default_prefetch_interval(),
            poll_interval_secs: default_poll_interval(),
            backfill_days: default_backfill_days(),
        }
    }
}

fn default_prefetch_interval() -> u64 {
    3
}

fn default_poll_interval() -> u64 {
    3600 // buckets are hourly
}

fn default_backfill_days() -> u32 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5000
}

/// Root application configuration.
///
/// Loaded from an optional `config.{yaml,toml}` in the working directory,
/// overridden by `TIDEMARK_*` environment variables
/// (e.g. `TIDEMARK_POSTGRES__HOST`, `TIDEMARK_INGESTION__POLL_INTERVAL_SECS`).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub ingestion: IngestionSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("TIDEMARK")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upstream.tokens")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.tokens.is_empty() {
            return Err(ConfigError::Message(
                "upstream.tokens must list at least one token".to_string(),
            ));
        }
        if self.upstream.page_size == 0 {
            return Err(ConfigError::Message(
                "upstream.page_size must be greater than 0".to_string(),
            ));
        }
        if self.ingestion.prefetch_interval_secs == 0 || self.ingestion.poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "ingestion intervals must be greater than 0".to_string(),
            ));
        }
        if self.ingestion.backfill_days == 0 {
            return Err(ConfigError::Message(
                "ingestion.backfill_days must be greater than 0".to_string(),
            ));
        }
        Url::parse(&self.upstream.url).map_err(|e| {
            ConfigError::Message(format!("upstream.url is not a valid URL: {}", e))
        })?;

        Ok(())
    }
}
