//! Bookkeeping for backends running in dry-run mode.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// Count reported for a target no dry-run call has touched yet.
pub const DRYRUN_DEFAULT_COUNT: u32 = 1;

/// Remembers the counts a dry-run backend pretended to apply, so later
/// count queries agree with earlier scale calls.
#[derive(Debug, Default)]
pub struct DryRunLedger {
    counts: Mutex<HashMap<String, u32>>,
}

impl DryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, target: &str, count: u32) {
        self.counts.lock().await.insert(target.to_string(), count);
    }

    pub async fn count(&self, target: &str) -> u32 {
        self.counts
            .lock()
            .await
            .get(target)
            .copied()
            .unwrap_or(DRYRUN_DEFAULT_COUNT)
    }
}
