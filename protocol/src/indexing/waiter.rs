//! # Indexing Waiter
//!
//! Polls the read model until every requested hash is visible.
//!
//! ```text
//! poll ──► all seen? ──yes──► Ok
//!   ▲          │no
//!   │          ▼
//!   └── sleep(interval + jitter) ◄── deadline passed? ──yes──► IndexingTimeout
//! ```
//!
//! - The first poll happens immediately; success returns on the poll that
//!   completes coverage, never one later.
//! - Hashes seen once stay seen. Later polls only ask about the rest.
//! - Cancellation is checked while a query is in flight and while sleeping;
//!   once it fires no further query is issued.
//! - A failing query counts as "nothing new" and is logged, not retried
//!   in a tight loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::config::{LifecycleConfig, MIN_POLL_INTERVAL};
use crate::ledger::TransactionHash;

use super::{IndexReader, IndexingError, IndexingWaitRequest};

/// Successful outcome of a wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingReport {
    /// Hashes confirmed visible (all of them).
    pub hashes: BTreeSet<TransactionHash>,
    /// Number of index queries issued.
    pub polls: u32,
    /// Time spent waiting, in milliseconds.
    pub elapsed_ms: u64,
}

/// Polls an [`IndexReader`] on a fixed, lightly jittered cadence.
#[derive(Clone)]
pub struct IndexingWaiter {
    index: Arc<dyn IndexReader>,
    poll_interval: Duration,
    poll_jitter: Duration,
}

impl IndexingWaiter {
    /// Create a waiter using the polling cadence from `config`.
    ///
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it, whether or
    /// not the caller ran [`LifecycleConfig::validate`].
    pub fn new(index: Arc<dyn IndexReader>, config: &LifecycleConfig) -> Self {
        let requested = config.poll_interval();
        if requested < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = requested.as_millis() as u64,
                min_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "poll interval below minimum, clamping"
            );
        }
        Self {
            index,
            poll_interval: requested.max(MIN_POLL_INTERVAL),
            poll_jitter: config.poll_jitter(),
        }
    }

    /// Wait until the index reports every hash in `request`, `timeout`
    /// elapses, or `cancel` fires.
    pub async fn wait_for(
        &self,
        request: IndexingWaitRequest,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<IndexingReport, IndexingError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let wanted = request.hashes;
        let mut seen: BTreeSet<TransactionHash> = BTreeSet::new();
        let mut polls: u32 = 0;

        if wanted.is_empty() {
            return Ok(report(wanted, polls, started));
        }

        loop {
            let outstanding: BTreeSet<TransactionHash> =
                wanted.difference(&seen).cloned().collect();
            if cancel.is_cancelled() {
                info!(outstanding = outstanding.len(), "indexing wait cancelled");
                return Err(IndexingError::Cancelled {
                    missing: outstanding,
                });
            }

            polls += 1;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(outstanding = outstanding.len(), "indexing wait cancelled mid-query");
                    return Err(IndexingError::Cancelled { missing: outstanding });
                }
                result = self.index.has_processed(&outstanding) => match result {
                    Ok(found) => {
                        seen.extend(found.into_iter().filter(|h| outstanding.contains(h)));
                        debug!(poll = polls, seen = seen.len(), wanted = wanted.len(), "index polled");
                    }
                    Err(e) => {
                        warn!(poll = polls, error = %e, "index query failed, will poll again");
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(poll = polls, "index query still in flight at deadline");
                }
            }

            if seen.len() == wanted.len() {
                info!(polls, elapsed_ms = started.elapsed().as_millis() as u64, "all hashes indexed");
                return Ok(report(wanted, polls, started));
            }

            let now = Instant::now();
            if now >= deadline {
                let missing: BTreeSet<_> = wanted.difference(&seen).cloned().collect();
                warn!(polls, missing = missing.len(), "indexing wait timed out");
                return Err(IndexingError::IndexingTimeout {
                    missing,
                    found: seen,
                    polls,
                });
            }

            let pause = self.next_delay().min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let missing = wanted.difference(&seen).cloned().collect();
                    info!("indexing wait cancelled between polls");
                    return Err(IndexingError::Cancelled { missing });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.poll_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.poll_interval;
        }
        self.poll_interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

fn report(hashes: BTreeSet<TransactionHash>, polls: u32, started: Instant) -> IndexingReport {
    IndexingReport {
        hashes,
        polls,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}
