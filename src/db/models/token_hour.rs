use chrono::{DateTime, Utc};

use super::Token;

/// Aggregated values for one hour bucket.
///
/// All fields carry at most 2 fractional digits; rounding happens when the
/// upstream page is normalized. `Default` is the all-zero bucket used for gap-fill.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HourValues {
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub price_usd: f64,
}

/// One token's hour bucket as fetched from upstream (PostgreSQL: token_hour_data)
///
/// Primary Key: (period_start, token.symbol)
/// Re-ingesting the same bucket overwrites every value column.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenHour {
    pub token: Token,
    /// Bucket start, truncated to the hour
    pub period_start: DateTime<Utc>,
    pub values: HourValues,
}

impl TokenHour {
    /// Bucket start as a unix epoch second (the watermark unit).
    pub fn epoch(&self) -> i64 {
        self.period_start.timestamp()
    }
}

/// A bucket as read back from storage for one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredHour {
    pub timestamp: DateTime<Utc>,
    pub values: HourValues,
}
