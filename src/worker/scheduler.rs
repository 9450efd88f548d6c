use std::time::{Duration, Instant};

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::IngestionSettings;
use crate::db::HourDataSink;
use crate::error::IngestError;
use crate::worker::{HourDataSource, ReadySignal, WatermarkTracker};

/// Ingestion cadence state. `Polling` is reached at most once and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prefetching,
    Polling,
}

/// Outcome of one pass over every tracked token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Tokens fetched (and persisted, when the page was non-empty)
    pub succeeded: usize,
    pub failed: usize,
    /// Hour rows written this pass
    pub rows: usize,
    /// This pass moved the scheduler from prefetching to polling
    pub transitioned: bool,
}

/// Prefetch-then-poll ingestion loop.
///
/// Walks every tracked token sequentially, fetching one page from its
/// confirmed watermark and persisting it. While prefetching, a pass that
/// makes no forward progress on any token switches the cadence to the
/// steady poll interval and fires the readiness signal.
///
/// A failing token is logged and skipped; its watermark stays put and the
/// next pass retries it. There is no retry limit.
pub struct IngestionScheduler<S, P> {
    source: S,
    sink: P,
    tokens: Vec<String>,
    page_size: u32,
    tracker: WatermarkTracker,
    phase: Phase,
    prefetch_interval: Duration,
    poll_interval: Duration,
    ready: ReadySignal,
    started_at: Instant,
}

impl<S: HourDataSource, P: HourDataSink> IngestionScheduler<S, P> {
    pub fn new(
        source: S,
        sink: P,
        tokens: Vec<String>,
        page_size: u32,
        settings: &IngestionSettings,
        initial_epoch: i64,
        ready: ReadySignal,
    ) -> Self {
        let tracker = WatermarkTracker::initialize(tokens.iter().cloned(), initial_epoch);

        Self {
            source,
            sink,
            tokens,
            page_size,
            tracker,
            phase: Phase::Prefetching,
            prefetch_interval: Duration::from_secs(settings.prefetch_interval_secs),
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            ready,
            started_at: Instant::now(),
        }
    }

    /// Override the cadences (sub-second intervals are not expressible in settings).
    pub fn with_intervals(mut self, prefetch: Duration, poll: Duration) -> Self {
        self.prefetch_interval = prefetch;
        self.poll_interval = poll;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sleep between passes in the current phase.
    pub fn cadence(&self) -> Duration {
        match self.phase {
            Phase::Prefetching => self.prefetch_interval,
            Phase::Polling => self.poll_interval,
        }
    }

    pub fn tracker(&self) -> &WatermarkTracker {
        &self.tracker
    }

    /// Runs passes until the cancellation token fires.
    ///
    /// Cancellation is honored both mid-pass and during the cadence sleep.
    /// An interrupted upsert is rolled back by its transaction.
    pub async fn run(mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        info!(
            "Ingestion started for {} tokens (prefetch every {:?}, poll every {:?})",
            self.tokens.len(),
            self.prefetch_interval,
            self.poll_interval
        );
        self.started_at = Instant::now();

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                report = self.run_pass() => {
                    if report.failed > 0 {
                        warn!(
                            "Pass finished with {} failed tokens ({} ok, {} rows)",
                            report.failed, report.succeeded, report.rows
                        );
                    }
                },
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(self.cadence()) => {},
            }
        }

        info!("Ingestion received cancellation signal, stopping");
        Ok(())
    }

    /// One pass: fetch and persist every token once, check for completion,
    /// then advance the watermarks.
    pub async fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();

        for token in self.tokens.clone() {
            let Some(since) = self.tracker.confirmed(&token) else {
                continue;
            };

            match self.ingest_token(&token, since).await {
                Ok(rows) => {
                    report.succeeded += 1;
                    report.rows += rows;
                },
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to ingest {} from {}: {}", token, since, e);
                },
            }
        }

        if self.phase == Phase::Prefetching && self.tracker.is_quiescent() {
            self.finish_prefetch();
            report.transitioned = true;
        }

        // Next pass starts from what this one saw
        self.tracker.advance();

        report
    }

    /// Fetch one page for `token` and persist it.
    ///
    /// The observation is recorded only after the commit, so a failed write
    /// leaves the token at its old watermark.
    async fn ingest_token(&mut self, token: &str, since: i64) -> Result<usize, IngestError> {
        let hours = self
            .source
            .fetch_hours(token, since, self.page_size)
            .await?;

        let Some(last) = hours.last() else {
            // Nothing at or past the watermark: no progress
            self.tracker.record_observation(token, since);
            return Ok(0);
        };
        let last_epoch = last.epoch();

        self.sink.upsert_hours(&hours).await?;
        self.tracker.record_observation(token, last_epoch);

        Ok(hours.len())
    }

    fn finish_prefetch(&mut self) {
        self.phase = Phase::Polling;
        info!(
            "Prefetch complete! Switching to poll every {:?}",
            self.poll_interval
        );
        info!("Prefetch runtime: {:.3?}", self.started_at.elapsed());

        if !self.ready.fire() {
            warn!("Readiness signal was already fired");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hour, MemoryStore, ScriptedSource};
    use crate::utils::HOUR_SECS;
    use crate::worker::readiness;
    use std::sync::Arc;

    const BASE: i64 = 1_689_534_000;

    fn settings() -> IngestionSettings {
        IngestionSettings::default()
    }

    fn series(symbol: &str, hours: i64) -> Vec<crate::db::models::TokenHour> {
        (0..hours)
            .map(|i| hour(symbol, BASE + i * HOUR_SECS, 100.0 + i as f64))
            .collect()
    }

    fn scheduler(
        source: Arc<ScriptedSource>,
        store: Arc<MemoryStore>,
        tokens: &[&str],
        page_size: u32,
    ) -> (
        IngestionScheduler<Arc<ScriptedSource>, Arc<MemoryStore>>,
        readiness::ReadyWaiter,
    ) {
        let (signal, waiter) = readiness::readiness();
        let scheduler = IngestionScheduler::new(
            source,
            store,
            tokens.iter().map(|t| t.to_string()).collect(),
            page_size,
            &settings(),
            BASE,
            signal,
        );
        (scheduler, waiter)
    }

    #[tokio::test]
    async fn test_backfill_reaches_quiescence_and_transitions_once() {
        let source = Arc::new(ScriptedSource::default());
        source.set_hours("wbtc", series("WBTC", 250));
        source.set_hours("shib", series("SHIB", 30));
        let store = Arc::new(MemoryStore::default());

        let (mut scheduler, waiter) = scheduler(source, store.clone(), &["wbtc", "shib"], 100);
        assert_eq!(scheduler.phase(), Phase::Prefetching);
        assert_eq!(scheduler.cadence(), Duration::from_secs(3));

        let mut transitions = 0;
        let mut passes = 0;
        while scheduler.phase() == Phase::Prefetching {
            let report = scheduler.run_pass().await;
            assert_eq!(report.failed, 0);
            if report.transitioned {
                transitions += 1;
            }
            passes += 1;
            assert!(passes < 10, "prefetch never completed");
        }

        // 0..99, 99..198, 198..249, then a no-progress pass at 249
        assert_eq!(passes, 4);
        assert_eq!(transitions, 1);
        assert!(waiter.is_ready());
        assert_eq!(scheduler.cadence(), Duration::from_secs(3600));
        assert_eq!(store.hour_count("WBTC"), 250);
        assert_eq!(store.hour_count("SHIB"), 30);

        // Polling passes never transition again
        for _ in 0..3 {
            let report = scheduler.run_pass().await;
            assert!(!report.transitioned);
            assert_eq!(scheduler.phase(), Phase::Polling);
        }
    }

    #[tokio::test]
    async fn test_no_new_records_triggers_transition() {
        // Both tokens already caught up at the watermark
        let source = Arc::new(ScriptedSource::default());
        source.set_hours("wbtc", vec![hour("WBTC", BASE, 100.0)]);
        source.set_hours("shib", vec![hour("SHIB", BASE, 0.01)]);
        let store = Arc::new(MemoryStore::default());

        let (mut scheduler, waiter) = scheduler(source, store, &["wbtc", "shib"], 100);
        let report = scheduler.run_pass().await;

        assert!(report.transitioned);
        assert_eq!(scheduler.tracker().confirmed("wbtc"), Some(BASE));
        assert_eq!(scheduler.tracker().confirmed("shib"), Some(BASE));
        assert!(waiter.is_ready());
    }

    #[tokio::test]
    async fn test_failing_token_does_not_affect_others() {
        let source = Arc::new(ScriptedSource::default());
        source.set_hours("wbtc", series("WBTC", 10));
        source.set_hours("shib", series("SHIB", 10));
        source.fail_next("wbtc", 1);
        let store = Arc::new(MemoryStore::default());

        let (mut scheduler, waiter) = scheduler(source, store.clone(), &["wbtc", "shib"], 100);
        let report = scheduler.run_pass().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert!(!report.transitioned);
        assert!(!waiter.is_ready());

        // SHIB advanced and persisted, WBTC stays put
        assert_eq!(store.hour_count("SHIB"), 10);
        assert_eq!(store.hour_count("WBTC"), 0);
        assert_eq!(scheduler.tracker().confirmed("shib"), Some(BASE + 9 * HOUR_SECS));
        assert_eq!(scheduler.tracker().confirmed("wbtc"), Some(BASE));

        // Retried from the same watermark on the next pass
        let report = scheduler.run_pass().await;
        assert_eq!(report.failed, 0);
        assert_eq!(store.hour_count("WBTC"), 10);
        assert_eq!(scheduler.tracker().confirmed("wbtc"), Some(BASE + 9 * HOUR_SECS));
    }

    #[tokio::test]
    async fn test_failed_token_blocks_transition_until_caught_up() {
        let source = Arc::new(ScriptedSource::default());
        source.set_hours("wbtc", series("WBTC", 250));
        source.set_hours("shib", series("SHIB", 1));
        let store = Arc::new(MemoryStore::default());

        let (mut scheduler, waiter) =
            scheduler(source.clone(), store.clone(), &["wbtc", "shib"], 100);
        let report = scheduler.run_pass().await;
        assert_eq!(report.succeeded, 2);
        assert!(!report.transitioned);

        // WBTC fails while SHIB sits still at its watermark
        source.fail_next("wbtc", 1);
        let report = scheduler.run_pass().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert!(!report.transitioned);
        assert!(!waiter.is_ready());
        assert_eq!(scheduler.phase(), Phase::Prefetching);
        assert_eq!(scheduler.tracker().confirmed("wbtc"), Some(BASE + 99 * HOUR_SECS));

        let mut passes = 0;
        while scheduler.phase() == Phase::Prefetching {
            scheduler.run_pass().await;
            passes += 1;
            assert!(passes < 10, "prefetch never completed");
        }

        // 99..198, 198..249, then a no-progress pass at 249
        assert_eq!(passes, 3);
        assert!(waiter.is_ready());
        assert_eq!(store.hour_count("WBTC"), 250);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_watermark() {
        let source = Arc::new(ScriptedSource::default());
        source.set_hours("gno", series("GNO", 5));
        let store = Arc::new(MemoryStore::default());
        store.fail_next_writes(1);

        let (mut scheduler, _waiter) = scheduler(source, store.clone(), &["gno"], 100);
        let report = scheduler.run_pass().await;

        assert_eq!(report.failed, 1);
        assert_eq!(store.hour_count("GNO"), 0);
        assert_eq!(scheduler.tracker().confirmed("gno"), Some(BASE));

        let report = scheduler.run_pass().await;
        assert_eq!(report.failed, 0);
        assert_eq!(store.hour_count("GNO"), 5);
    }

    #[tokio::test]
    async fn test_empty_page_counts_as_no_progress() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::default());

        let (mut scheduler, waiter) = scheduler(source, store.clone(), &["gno"], 100);
        let report = scheduler.run_pass().await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.rows, 0);
        assert!(report.transitioned);
        assert!(waiter.is_ready());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_replayed_bucket_overwrites_values() {
        let source = Arc::new(ScriptedSource::default());
        source.set_hours("wbtc", vec![hour("WBTC", BASE, 100.0)]);
        let store = Arc::new(MemoryStore::default());

        let (mut scheduler, _waiter) = scheduler(source.clone(), store.clone(), &["wbtc"], 100);
        scheduler.run_pass().await;

        // Upstream late-finalizes the same bucket
        source.set_hours("wbtc", vec![hour("WBTC", BASE, 104.25)]);
        scheduler.run_pass().await;

        assert_eq!(store.hour_count("WBTC"), 1);
        assert_eq!(store.values("WBTC", BASE).unwrap().open, 104.25);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation_after_ready() {
        let source = Arc::new(ScriptedSource::default());
        source.set_hours("wbtc", series("WBTC", 3));
        let store = Arc::new(MemoryStore::default());

        let (scheduler, waiter) = scheduler(source, store.clone(), &["wbtc"], 2);
        let scheduler =
            scheduler.with_intervals(Duration::from_millis(1), Duration::from_secs(3600));

        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));

        tokio::time::timeout(Duration::from_secs(5), waiter.wait())
            .await
            .expect("prefetch did not complete");
        assert_eq!(store.hour_count("WBTC"), 3);

        // Cancelled while sleeping out the hourly cadence
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap()
            .unwrap();
    }
}
