//! In-memory fakes for the upstream source and the store.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::db::models::{HourValues, StoredHour, Token, TokenHour};
use crate::db::{HourDataReader, HourDataSink};
use crate::error::{IngestError, QueryError};
use crate::utils::epoch_to_datetime;
use crate::worker::HourDataSource;

pub fn token(symbol: &str) -> Token {
    Token::new(
        format!("0x{}", symbol.to_lowercase()),
        symbol.to_string(),
        format!("{} token", symbol),
        BigDecimal::from_str("1000000").unwrap(),
        BigDecimal::from_str("2500000.5").unwrap(),
        18,
    )
}

pub fn values(open: f64) -> HourValues {
    HourValues {
        open,
        close: open + 1.0,
        high: open + 2.0,
        low: open - 1.0,
        price_usd: open + 0.5,
    }
}

pub fn hour(symbol: &str, epoch: i64, open: f64) -> TokenHour {
    TokenHour {
        token: token(symbol),
        period_start: epoch_to_datetime(epoch).unwrap(),
        values: values(open),
    }
}

/// Upstream fake serving a fixed dataset per token id.
#[derive(Default)]
pub struct ScriptedSource {
    hours: Mutex<HashMap<String, Vec<TokenHour>>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    /// Replace the dataset for `token_id`. Must be ascending.
    pub fn set_hours(&self, token_id: &str, hours: Vec<TokenHour>) {
        self.hours.lock().unwrap().insert(token_id.to_string(), hours);
    }

    /// Make the next `count` fetches for `token_id` fail.
    pub fn fail_next(&self, token_id: &str, count: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(token_id.to_string(), count);
    }
}

#[async_trait]
impl HourDataSource for ScriptedSource {
    async fn fetch_hours(
        &self,
        token_id: &str,
        since_epoch: i64,
        limit: u32,
    ) -> Result<Vec<TokenHour>, IngestError> {
        if let Some(remaining) = self.failures.lock().unwrap().get_mut(token_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(IngestError::UpstreamQuery(vec![
                    "scripted failure".to_string(),
                ]));
            }
        }

        Ok(self
            .hours
            .lock()
            .unwrap()
            .get(token_id)
            .map(|hours| {
                hours
                    .iter()
                    .filter(|h| h.epoch() >= since_epoch)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Store fake with the same upsert-overwrite semantics as PostgreSQL.
#[derive(Default)]
pub struct MemoryStore {
    hours: Mutex<BTreeMap<(String, i64), HourValues>>,
    tokens: Mutex<HashMap<String, Token>>,
    write_failures: AtomicUsize,
    read_failures: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn insert(&self, symbol: &str, epoch: i64, values: HourValues) {
        self.hours
            .lock()
            .unwrap()
            .insert((symbol.to_string(), epoch), values);
    }

    pub fn hour_count(&self, symbol: &str) -> usize {
        self.hours
            .lock()
            .unwrap()
            .keys()
            .filter(|(s, _)| s == symbol)
            .count()
    }

    pub fn values(&self, symbol: &str, epoch: i64) -> Option<HourValues> {
        self.hours
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), epoch))
            .copied()
    }

    pub fn token(&self, symbol: &str) -> Option<Token> {
        self.tokens.lock().unwrap().get(symbol).cloned()
    }

    /// Committed upserts so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, count: usize) {
        self.read_failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn snapshot(&self) -> (BTreeMap<(String, i64), HourValues>, HashMap<String, Token>) {
        (
            self.hours.lock().unwrap().clone(),
            self.tokens.lock().unwrap().clone(),
        )
    }
}

#[async_trait]
impl HourDataSink for MemoryStore {
    async fn upsert_hours(&self, hours: &[TokenHour]) -> Result<(), IngestError> {
        let Some(latest) = hours.last() else {
            return Ok(());
        };
        if Self::take_failure(&self.write_failures) {
            return Err(IngestError::Persistence("scripted failure".into()));
        }

        let mut stored = self.hours.lock().unwrap();
        for hour in hours {
            stored.insert((hour.token.symbol.clone(), hour.epoch()), hour.values);
        }
        self.tokens
            .lock()
            .unwrap()
            .insert(latest.token.symbol.clone(), latest.token.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

#[async_trait]
impl HourDataReader for MemoryStore {
    async fn token_hours(&self, symbol: &str) -> Result<Vec<StoredHour>, QueryError> {
        if Self::take_failure(&self.read_failures) {
            return Err(QueryError::Storage("scripted failure".into()));
        }

        Ok(self
            .hours
            .lock()
            .unwrap()
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .filter_map(|((_, epoch), values)| {
                Some(StoredHour {
                    timestamp: epoch_to_datetime(*epoch)?,
                    values: *values,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_batch_twice_is_idempotent() {
        let store = MemoryStore::default();
        let batch = vec![
            hour("GNO", 3600, 5.56),
            hour("GNO", 7200, 5.6),
            hour("GNO", 10800, 5.7),
        ];

        store.upsert_hours(&batch).await.unwrap();
        let first = store.snapshot();
        store.upsert_hours(&batch).await.unwrap();
        let second = store.snapshot();

        assert_eq!(first, second);
        assert_eq!(store.hour_count("GNO"), 3);
    }
}
