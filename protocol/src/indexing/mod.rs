//! # Indexing — Read-After-Write Reconciliation
//!
//! The ledger says "confirmed" before the read model can answer queries
//! about it. Anything that reads through the index right after confirmation
//! would see stale data. The [`IndexingWaiter`] closes that window by polling
//! the index until it reports every hash of the batch, instead of guessing a
//! fixed delay.
//!
//! A timeout here does **not** mean the write failed. It means the write is
//! durable and not yet visible; [`IndexingError::IndexingTimeout`] carries
//! the missing hashes so the caller can poll again later.

pub mod waiter;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::TransactionHash;

pub use waiter::{IndexingReport, IndexingWaiter};

/// A failed index query. Transient by assumption: the waiter logs it and
/// polls again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("index query failed: {0}")]
pub struct IndexQueryError(pub String);

/// The external read model.
#[async_trait]
pub trait IndexReader: Send + Sync {
    /// Return the subset of `hashes` the index has processed.
    async fn has_processed(
        &self,
        hashes: &BTreeSet<TransactionHash>,
    ) -> Result<BTreeSet<TransactionHash>, IndexQueryError>;
}

/// The hashes one lifecycle waits for. Built once per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingWaitRequest {
    /// Hashes that must all become visible.
    pub hashes: BTreeSet<TransactionHash>,
}

impl IndexingWaitRequest {
    /// Wait for `hashes`.
    pub fn new(hashes: impl IntoIterator<Item = TransactionHash>) -> Self {
        Self {
            hashes: hashes.into_iter().collect(),
        }
    }
}

/// Why the indexing wait ended without full coverage.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum IndexingError {
    /// The deadline passed. The ledger write stands; `missing` is not
    /// queryable yet.
    #[error("indexing timed out after {polls} polls; {} of {} hashes missing", .missing.len(), .missing.len() + .found.len())]
    IndexingTimeout {
        /// Hashes never reported.
        missing: BTreeSet<TransactionHash>,
        /// Hashes that did show up.
        found: BTreeSet<TransactionHash>,
        /// Number of index queries issued.
        polls: u32,
    },

    /// The caller cancelled the wait. No further queries are issued.
    #[error("indexing wait cancelled with {} hashes outstanding", .missing.len())]
    Cancelled {
        /// Hashes not yet seen when the wait stopped.
        missing: BTreeSet<TransactionHash>,
    },
}
