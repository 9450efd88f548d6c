use std::collections::HashMap;

/// Per-token cursor positions for the prefetch/poll loop.
///
/// `confirmed` holds the epoch each token's next fetch starts from.
/// `observed` holds the last bucket epoch seen for each token during the
/// current pass. Lives in memory only; a restart replays the backfill window.
#[derive(Debug, Clone, Default)]
pub struct WatermarkTracker {
    confirmed: HashMap<String, i64>,
    observed: HashMap<String, i64>,
}

impl WatermarkTracker {
    /// Start every token at `default_epoch` with nothing observed.
    pub fn initialize<I, T>(tokens: I, default_epoch: i64) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            confirmed: tokens
                .into_iter()
                .map(|t| (t.into(), default_epoch))
                .collect(),
            observed: HashMap::new(),
        }
    }

    pub fn confirmed(&self, token: &str) -> Option<i64> {
        self.confirmed.get(token).copied()
    }

    pub fn observed(&self, token: &str) -> Option<i64> {
        self.observed.get(token).copied()
    }

    pub fn record_observation(&mut self, token: &str, last_record_epoch: i64) {
        self.observed.insert(token.to_string(), last_record_epoch);
    }

    /// True when the last pass made no forward progress on any token:
    /// both maps hold the same tokens with the same epochs.
    ///
    /// This infers completion from the absence of progress; the subgraph
    /// never says "last page" explicitly.
    pub fn is_quiescent(&self) -> bool {
        self.confirmed == self.observed
    }

    /// Make the observed positions the starting points of the next pass,
    /// then clear them so the next pass is judged on its own fetches.
    ///
    /// A token with no observation (its fetch failed) keeps its confirmed
    /// epoch and is retried from the same point. Until it reports again it
    /// blocks quiescence.
    pub fn advance(&mut self) {
        for (token, epoch) in self.observed.drain() {
            self.confirmed.insert(token, epoch);
        }
    }
}
