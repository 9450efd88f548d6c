use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

const SCHEMA: &str = include_str!("../../../schema/postgres.sql");
const CONNECT_ATTEMPTS: u32 = 3;

/// 200ms, 400ms, ... between connection attempts.
fn connect_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2_u64.pow(attempt))
}

/// PostgreSQL client with connection pooling.
///
/// The ingestion loop and every HTTP request each check out their own
/// connection from the `deadpool-postgres` pool; a connection is returned
/// to the pool when the operation using it finishes, error or not.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!(
            "Connecting to PostgreSQL at {}:{}/{}",
            settings.host, settings.port, settings.database
        );

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let mut attempt = 1;
        loop {
            let err = match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self { pool });
                },
                Err(e) => e,
            };

            if attempt >= CONNECT_ATTEMPTS {
                return Err(anyhow::Error::new(err).context(format!(
                    "Failed to connect to PostgreSQL after {} attempts",
                    CONNECT_ATTEMPTS
                )));
            }

            let delay = connect_backoff(attempt);
            warn!(
                "Failed to connect to PostgreSQL (attempt {}/{}): {}, retrying in {:?}",
                attempt, CONNECT_ATTEMPTS, err, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    /// Create the `token` and `token_hour_data` tables if missing.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        client
            .batch_execute(SCHEMA)
            .await
            .context("Failed to apply schema/postgres.sql")?;

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}
