use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};

use crate::db::models::{HourValues, StoredHour, Token, TokenHour};
use crate::db::postgres::PostgresClient;
use crate::db::{HourDataReader, HourDataSink};
use crate::error::{IngestError, QueryError};

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

/// Rows are already hour-aligned on write. Reading the column as stored
/// keeps the session `TimeZone` out of the bucket boundaries.
const TOKEN_HOURS_QUERY: &str = r#"
    SELECT iso_timestamp, open, close, high, low, price_usd
    FROM token_hour_data
    WHERE token_symbol = $1
    ORDER BY iso_timestamp
"#;

/// Collapse a page to one row per bucket, keeping the last occurrence.
/// A single `INSERT .. ON CONFLICT DO UPDATE` may touch a row only once.
fn dedup_by_bucket(hours: &[TokenHour]) -> Vec<&TokenHour> {
    let mut by_bucket: BTreeMap<(DateTime<Utc>, &str), &TokenHour> = BTreeMap::new();
    for hour in hours {
        by_bucket.insert((hour.period_start, hour.token.symbol.as_str()), hour);
    }
    by_bucket.into_values().collect()
}

/// What one page writes: deduplicated hour rows plus the token row.
///
/// The token row is taken from the last record: pages are ascending, so it
/// carries the freshest metadata. `None` for an empty page.
fn plan_page(hours: &[TokenHour]) -> Option<(Vec<&TokenHour>, &Token)> {
    let latest = hours.last()?;
    Some((dedup_by_bucket(hours), &latest.token))
}

impl PostgresClient {
    // ==================== TOKEN HOUR DATA ====================

    /// Upsert a page of hour buckets plus the token row in one transaction.
    /// Any failure rolls back both statements.
    pub async fn upsert_token_hours(&self, hours: &[TokenHour]) -> Result<(), IngestError> {
        let Some((rows, token)) = plan_page(hours) else {
            return Ok(());
        };

        const COLS_PER_ROW: usize = 7;
        const BATCH_SIZE: usize = 500;

        let symbols: Vec<String> = rows
            .iter()
            .map(|hour| sanitize_string(&hour.token.symbol))
            .collect();

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        for (chunk_idx, chunk) in rows.chunks(BATCH_SIZE).enumerate() {
            // Build VALUES placeholders: ($1,...,$7), ($8,...,$14), ...
            let values_clauses: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO token_hour_data (
                    iso_timestamp, token_symbol, open, close, high, low, price_usd
                ) VALUES {}
                ON CONFLICT (iso_timestamp, token_symbol) DO UPDATE SET
                    open = EXCLUDED.open,
                    close = EXCLUDED.close,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    price_usd = EXCLUDED.price_usd
                "#,
                values_clauses.join(", ")
            );

            let offset = chunk_idx * BATCH_SIZE;
            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (i, hour) in chunk.iter().enumerate() {
                params.push(&hour.period_start);
                params.push(&symbols[offset + i]);
                params.push(&hour.values.open);
                params.push(&hour.values.close);
                params.push(&hour.values.high);
                params.push(&hour.values.low);
                params.push(&hour.values.price_usd);
            }

            tx.execute(&query, &params).await.map_err(|e| {
                error!(
                    "Failed to upsert {} hour rows for {}: {:?}",
                    chunk.len(),
                    token.symbol,
                    e
                );
                e
            })?;
        }

        upsert_token(&tx, token).await?;

        tx.commit().await?;

        debug!(
            "Committed {} hour rows for {}",
            rows.len(),
            token.symbol
        );
        Ok(())
    }

    /// Every stored bucket for a symbol, ascending.
    pub async fn get_token_hours(&self, symbol: &str) -> Result<Vec<StoredHour>, QueryError> {
        let client = self.pool.get().await?;

        let rows = client.query(TOKEN_HOURS_QUERY, &[&symbol]).await?;
        let hours = rows
            .iter()
            .map(|row| StoredHour {
                timestamp: row.get("iso_timestamp"),
                values: HourValues {
                    open: row.get("open"),
                    close: row.get("close"),
                    high: row.get("high"),
                    low: row.get("low"),
                    price_usd: row.get("price_usd"),
                },
            })
            .collect();

        Ok(hours)
    }
}

// ==================== TOKENS ====================

async fn upsert_token(
    tx: &deadpool_postgres::Transaction<'_>,
    token: &Token,
) -> Result<(), IngestError> {
    // Numerics travel as text so no precision is lost on the way in
    let query = r#"
        INSERT INTO token (symbol, address, name, total_supply, volume_usd, decimals)
        VALUES ($1, $2, $3, $4::text::numeric, $5::text::numeric, $6)
        ON CONFLICT (symbol) DO UPDATE SET
            address = EXCLUDED.address,
            name = EXCLUDED.name,
            total_supply = EXCLUDED.total_supply,
            volume_usd = EXCLUDED.volume_usd,
            decimals = EXCLUDED.decimals
    "#;

    let symbol = sanitize_string(&token.symbol);
    let name = sanitize_string(&token.name);
    let total_supply = token.total_supply.to_string();
    let volume_usd = token.volume_usd.to_string();

    tx.execute(
        query,
        &[
            &symbol,
            &token.address,
            &name,
            &total_supply,
            &volume_usd,
            &token.decimals,
        ],
    )
    .await
    .map_err(|e| {
        error!("Failed to upsert token {}: {:?}", token.symbol, e);
        e
    })?;

    Ok(())
}

#[async_trait]
impl HourDataSink for PostgresClient {
    async fn upsert_hours(&self, hours: &[TokenHour]) -> Result<(), IngestError> {
        self.upsert_token_hours(hours).await
    }
}

#[async_trait]
impl HourDataReader for PostgresClient {
    async fn token_hours(&self, symbol: &str) -> Result<Vec<StoredHour>, QueryError> {
        self.get_token_hours(symbol).await
    }
}
