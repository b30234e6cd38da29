//! Simulated read model.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::indexing::{IndexQueryError, IndexReader};
use crate::ledger::TransactionHash;

/// In-memory index that becomes aware of a confirmed hash `lag` after the
/// ledger reports it.
#[derive(Default)]
pub struct InMemoryIndex {
    observed: Mutex<HashMap<TransactionHash, Instant>>,
    hidden: Mutex<HashSet<TransactionHash>>,
    lag: Duration,
    failing_queries: AtomicUsize,
    queries: AtomicUsize,
}

impl InMemoryIndex {
    /// An index with zero lag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ingestion lag.
    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = lag;
        self
    }

    /// Called by the ledger when `hash` confirms.
    pub fn observe(&self, hash: &TransactionHash) {
        self.observed
            .lock()
            .entry(hash.clone())
            .or_insert_with(Instant::now);
    }

    /// Never report `hash`, whatever the ledger says.
    pub fn hide(&self, hash: impl Into<TransactionHash>) {
        self.hidden.lock().insert(hash.into());
    }

    /// Make the next `n` queries fail.
    pub fn fail_next_queries(&self, n: usize) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    /// Number of `has_processed` calls so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Whether `hash` would be reported right now.
    pub fn is_visible(&self, hash: &TransactionHash) -> bool {
        if self.hidden.lock().contains(hash) {
            return false;
        }
        self.observed
            .lock()
            .get(hash)
            .map(|seen_at| Instant::now() >= *seen_at + self.lag)
            .unwrap_or(false)
    }
}

#[async_trait]
impl IndexReader for InMemoryIndex {
    async fn has_processed(
        &self,
        hashes: &BTreeSet<TransactionHash>,
    ) -> Result<BTreeSet<TransactionHash>, IndexQueryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IndexQueryError("indexer returned 503".to_string()));
        }

        Ok(hashes
            .iter()
            .filter(|h| self.is_visible(h))
            .cloned()
            .collect())
    }
}
