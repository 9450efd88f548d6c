//! Utility functions for the tidemark service.
//!
//! - [`conversion`] - Decimal parsing and the 2-digit rounding contract
//! - [`time`] - Hour-bucket arithmetic on epochs and timestamps

mod conversion;
mod time;

/// One bucket, in seconds.
pub const HOUR_SECS: i64 = 3600;

pub use conversion::{decimal_to_f64, parse_decimal, round_to_cents};
pub use time::{days_ago_epoch, epoch_to_datetime, truncate_to_hour};
