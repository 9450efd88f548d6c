use chrono::{DateTime, Duration, Utc};

use super::HOUR_SECS;

/// Truncate an epoch second down to the start of its hour.
pub fn truncate_to_hour(epoch: i64) -> i64 {
    epoch.div_euclid(HOUR_SECS) * HOUR_SECS
}

/// Start of the hour `days` days before `now`, as an epoch second.
///
/// This is the initial watermark for every tracked token.
pub fn days_ago_epoch(now: DateTime<Utc>, days: u32) -> i64 {
    truncate_to_hour((now - Duration::days(i64::from(days))).timestamp())
}

pub fn epoch_to_datetime(epoch: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(epoch, 0)
}
