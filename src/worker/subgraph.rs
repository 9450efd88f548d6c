use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::SecondsFormat;
use log::{debug, error};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::config::UpstreamSettings;
use crate::db::models::{HourValues, Token, TokenHour};
use crate::error::IngestError;
use crate::utils::{decimal_to_f64, epoch_to_datetime, parse_decimal, round_to_cents, truncate_to_hour};

/// Source of hourly token buckets, queried one page at a time.
#[async_trait]
pub trait HourDataSource: Send + Sync {
    /// Up to `limit` buckets for `token_id` starting at `since_epoch` (inclusive),
    /// ascending by bucket start.
    async fn fetch_hours(
        &self,
        token_id: &str,
        since_epoch: i64,
        limit: u32,
    ) -> Result<Vec<TokenHour>, IngestError>;
}

#[async_trait]
impl<T: HourDataSource + ?Sized> HourDataSource for Arc<T> {
    async fn fetch_hours(
        &self,
        token_id: &str,
        since_epoch: i64,
        limit: u32,
    ) -> Result<Vec<TokenHour>, IngestError> {
        (**self).fetch_hours(token_id, since_epoch, limit).await
    }
}

/// Uniswap V3 subgraph client.
///
/// Posts a `tokenHourDatas` GraphQL query and normalizes the page into
/// [`TokenHour`] records. Errors reported inside the GraphQL envelope are
/// surfaced as [`IngestError::UpstreamQuery`] regardless of HTTP status.
#[derive(Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
    url: Url,
}

impl SubgraphClient {
    pub fn new(settings: &UpstreamSettings) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.url).context("Invalid subgraph URL")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl HourDataSource for SubgraphClient {
    async fn fetch_hours(
        &self,
        token_id: &str,
        since_epoch: i64,
        limit: u32,
    ) -> Result<Vec<TokenHour>, IngestError> {
        let body = json!({ "query": build_query(token_id, since_epoch, limit) });

        let response = self.client.post(self.url.clone()).json(&body).send().await?;
        let status_error = response.error_for_status_ref().err();
        let bytes = response.bytes().await?;

        let hours = match parse_response(&bytes) {
            Ok(hours) => hours,
            // An unparseable body on a failed status is a transport problem,
            // not a bad record
            Err(IngestError::MalformedRecord(reason)) => {
                return Err(match status_error {
                    Some(e) => IngestError::UpstreamUnavailable(e),
                    None => IngestError::MalformedRecord(reason),
                });
            },
            Err(e) => return Err(e),
        };

        if log::log_enabled!(log::Level::Debug) {
            let from = epoch_to_datetime(since_epoch)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default();
            match hours.last() {
                Some(last) => debug!(
                    "Fetched {} hours for {} from {} ({}), last record {} at {}",
                    hours.len(),
                    token_id,
                    since_epoch,
                    from,
                    last.token.symbol,
                    last.period_start.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
                None => debug!(
                    "No hours for {} from {} ({})",
                    token_id, since_epoch, from
                ),
            }
        }

        Ok(hours)
    }
}

/// Build the `tokenHourDatas` query for one token.
///
/// The token id is lowercased; the subgraph stores addresses in lowercase.
pub fn build_query(token_id: &str, since_epoch: i64, limit: u32) -> String {
    format!(
        r#"{{
    tokenHourDatas(
        orderBy: periodStartUnix
        first: {limit}
        orderDirection: asc
        where: {{ token: "{token}", periodStartUnix_gte: {since_epoch} }}
    ) {{
        open
        close
        high
        low
        priceUSD
        token {{
            id
            name
            symbol
            totalSupply
            volumeUSD
            decimals
        }}
        periodStartUnix
    }}
}}"#,
        limit = limit,
        token = token_id.to_lowercase(),
        since_epoch = since_epoch,
    )
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<TokenHourPage>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenHourPage {
    token_hour_datas: Vec<RawTokenHour>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenHour {
    open: Option<Value>,
    close: Option<Value>,
    high: Option<Value>,
    low: Option<Value>,
    #[serde(rename = "priceUSD")]
    price_usd: Option<Value>,
    period_start_unix: Option<Value>,
    token: Option<RawToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToken {
    id: Option<String>,
    name: Option<String>,
    symbol: Option<String>,
    total_supply: Option<Value>,
    #[serde(rename = "volumeUSD")]
    volume_usd: Option<Value>,
    decimals: Option<Value>,
}

/// Decode a subgraph response body into normalized records.
///
/// Any malformed record fails the whole page.
pub fn parse_response(body: &[u8]) -> Result<Vec<TokenHour>, IngestError> {
    let response: GraphQlResponse = serde_json::from_slice(body)
        .map_err(|e| IngestError::MalformedRecord(format!("invalid response body: {}", e)))?;

    if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
        let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
        for message in &messages {
            error!("GraphQL error: {}", message);
        }
        return Err(IngestError::UpstreamQuery(messages));
    }

    let page = response.data.ok_or_else(|| {
        IngestError::MalformedRecord("response carries neither data nor errors".to_string())
    })?;

    let hours = page
        .token_hour_datas
        .into_iter()
        .enumerate()
        .map(|(i, raw)| normalize(raw).map_err(|e| malformed_at(i, e)))
        .collect::<Result<Vec<_>, _>>()?;

    if hours.windows(2).any(|w| w[0].period_start > w[1].period_start) {
        return Err(IngestError::MalformedRecord(
            "page is not in ascending bucket order".to_string(),
        ));
    }

    Ok(hours)
}

fn malformed_at(index: usize, reason: String) -> IngestError {
    IngestError::MalformedRecord(format!("record {}: {}", index, reason))
}

fn normalize(raw: RawTokenHour) -> Result<TokenHour, String> {
    let token = raw.token.ok_or("missing token")?;

    let period_start_unix = raw
        .period_start_unix
        .as_ref()
        .and_then(value_to_i64)
        .ok_or("missing or invalid periodStartUnix")?;
    let period_start = epoch_to_datetime(truncate_to_hour(period_start_unix))
        .ok_or("periodStartUnix out of range")?;

    let values = HourValues {
        open: metric(&raw.open, "open")?,
        close: metric(&raw.close, "close")?,
        high: metric(&raw.high, "high")?,
        low: metric(&raw.low, "low")?,
        price_usd: metric(&raw.price_usd, "priceUSD")?,
    };

    let decimals = token
        .decimals
        .as_ref()
        .and_then(value_to_i64)
        .and_then(|d| i32::try_from(d).ok())
        .ok_or("missing or invalid token.decimals")?;

    let token = Token::new(
        token.id.ok_or("missing token.id")?,
        token.symbol.ok_or("missing token.symbol")?,
        token.name.ok_or("missing token.name")?,
        token
            .total_supply
            .as_ref()
            .and_then(parse_decimal)
            .ok_or("missing or invalid token.totalSupply")?,
        token
            .volume_usd
            .as_ref()
            .and_then(parse_decimal)
            .ok_or("missing or invalid token.volumeUSD")?,
        decimals,
    );

    Ok(TokenHour {
        token,
        period_start,
        values,
    })
}

/// Parse, round to cents, and convert one price field.
fn metric(value: &Option<Value>, field: &str) -> Result<f64, String> {
    value
        .as_ref()
        .and_then(parse_decimal)
        .map(|d| round_to_cents(&d))
        .and_then(|d| decimal_to_f64(&d))
        .ok_or_else(|| format!("missing or invalid {}", field))
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
