//! Gap-filled range queries over stored hour buckets.
//!
//! The axis spans the token's entire stored history, from its earliest to its
//! latest bucket, stepping by a fixed number of hours. A step with no stored
//! bucket yields zeros for every metric instead of being omitted, so callers
//! always get a regularly spaced series.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::db::models::{HourValues, StoredHour};
use crate::db::HourDataReader;
use crate::error::QueryError;
use crate::utils::{epoch_to_datetime, truncate_to_hour, HOUR_SECS};

/// External metric labels, in output order.
pub const METRIC_LABELS: [&str; 5] = ["open", "close", "high", "low", "priceUSD"];

/// `[ISO-8601 timestamp, metric label, value]`, serialized as a JSON array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint(pub String, pub &'static str, pub f64);

pub type MetricSeries = Vec<SeriesPoint>;

#[derive(Clone)]
pub struct RangeQueryEngine {
    reader: Arc<dyn HourDataReader>,
}

impl RangeQueryEngine {
    pub fn new(reader: Arc<dyn HourDataReader>) -> Self {
        Self { reader }
    }

    /// Five ascending series (open, close, high, low, priceUSD) for `symbol`.
    ///
    /// `None` means the token has no stored history at all (not tracked).
    pub async fn query(
        &self,
        symbol: &str,
        step_hours: NonZeroU32,
    ) -> Result<Option<Vec<MetricSeries>>, QueryError> {
        let stored = self.reader.token_hours(symbol).await?;
        let rows = gap_fill(&stored, step_hours);

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(to_metric_series(&rows)))
    }
}

/// Resample stored buckets onto a regular axis.
///
/// The axis runs from the hour-truncated minimum to the hour-truncated maximum
/// stored timestamp, inclusive, every `step_hours` hours. Points with no stored
/// bucket are zero-filled. The maximum is only included when it falls on the
/// axis. Empty input gives an empty axis.
pub fn gap_fill(stored: &[StoredHour], step_hours: NonZeroU32) -> Vec<(DateTime<Utc>, HourValues)> {
    let by_hour: BTreeMap<i64, HourValues> = stored
        .iter()
        .map(|hour| (truncate_to_hour(hour.timestamp.timestamp()), hour.values))
        .collect();

    let (Some(&min), Some(&max)) = (by_hour.keys().next(), by_hour.keys().next_back()) else {
        return Vec::new();
    };

    let step = i64::from(step_hours.get()) * HOUR_SECS;
    let mut rows = Vec::with_capacity(((max - min) / step + 1) as usize);

    let mut ts = min;
    while ts <= max {
        let Some(timestamp) = epoch_to_datetime(ts) else {
            break;
        };
        let values = by_hour.get(&ts).copied().unwrap_or_default();
        rows.push((timestamp, values));
        ts += step;
    }

    rows
}

/// Pivot rows into one series per metric, keeping timestamp order.
pub fn to_metric_series(rows: &[(DateTime<Utc>, HourValues)]) -> Vec<MetricSeries> {
    let mut series: Vec<MetricSeries> = METRIC_LABELS
        .iter()
        .map(|_| Vec::with_capacity(rows.len()))
        .collect();

    for (timestamp, values) in rows {
        let iso = timestamp.to_rfc3339_opts(SecondsFormat::Secs, false);
        let metrics = [
            values.open,
            values.close,
            values.high,
            values.low,
            values.price_usd,
        ];
        for ((out, label), value) in series.iter_mut().zip(METRIC_LABELS).zip(metrics) {
            out.push(SeriesPoint(iso.clone(), label, value));
        }
    }

    series
}
