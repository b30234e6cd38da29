//! Core type definitions for ledger submission.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::verification::ChallengeResponse;

// ---------------------------------------------------------------------------
// TransactionHash
// ---------------------------------------------------------------------------

/// Ledger-assigned transaction identifier.
///
/// Kept exactly as the ledger reported it: identifiers such as base58
/// signatures are case-sensitive, and the same string is handed back to
/// [`Ledger::subscribe_to_status`] and the index. Ordered so hash sets print
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TransactionHash(String);

impl TransactionHash {
    /// Wrap a hash string as-is.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// The string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TransactionHash {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for TransactionHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<TransactionHash> for String {
    fn from(h: TransactionHash) -> Self {
        h.0
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One on-ledger call inside an [`Operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCall {
    /// Short name shown to the user, e.g. `"approve"`.
    pub label: String,
    /// Call arguments, opaque to this crate.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A logical state change, possibly spanning several dependent ledger
/// transactions (approve-then-execute being the classic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// What kind of operation this is, e.g. `"transfer"` or `"swap"`.
    pub kind: String,
    /// Ledger calls, submitted in order. Each waits for the previous one
    /// to confirm.
    pub steps: Vec<LedgerCall>,
}

impl Operation {
    /// Start an operation with no steps.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            steps: Vec::new(),
        }
    }

    /// A one-step operation whose single call shares the operation's name.
    pub fn single(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        let kind = kind.into();
        Self::new(kind.clone()).step(kind, payload)
    }

    /// Append a step.
    pub fn step(mut self, label: impl Into<String>, payload: serde_json::Value) -> Self {
        self.steps.push(LedgerCall {
            label: label.into(),
            payload,
        });
        self
    }

    /// Structural checks that need no ledger round-trip.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.trim().is_empty() {
            return Err("operation kind must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return Err(format!("operation '{}' has no steps", self.kind));
        }
        if let Some(i) = self.steps.iter().position(|s| s.label.trim().is_empty()) {
            return Err(format!("step {} of '{}' has an empty label", i, self.kind));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger Collaborator
// ---------------------------------------------------------------------------

/// Status transitions reported by the ledger's confirmation feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Seen by the ledger, not final yet.
    Pending {
        /// Confirmations accumulated so far.
        confirmations: u32,
    },
    /// Final and successful.
    Confirmed {
        /// Block that includes the transaction.
        block_number: u64,
        /// Whatever the call returned (receipt fields, created ids, ...).
        result: serde_json::Value,
    },
    /// Accepted at submission, then rejected on execution.
    Reverted {
        /// Revert reason as reported by the ledger.
        reason: String,
    },
}

/// Errors from the ledger collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger refused the submission outright (bad challenge, simulation
    /// revert, nonce clash, ...). No hash was assigned.
    #[error("submission rejected: {reason}")]
    Rejected {
        /// Human-readable reason.
        reason: String,
        /// Revert reason, if the rejection came from a pre-flight execution.
        revert_reason: Option<String>,
    },

    /// The ledger endpoint could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Confirmation feed for one transaction hash.
pub type StatusFeed = BoxStream<'static, LedgerStatus>;

/// The external ledger RPC.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit one call. Returns once the ledger acknowledges it with a hash.
    async fn submit(
        &self,
        operation_id: Uuid,
        call: &LedgerCall,
        challenge: &ChallengeResponse,
    ) -> Result<TransactionHash, LedgerError>;

    /// Subscribe to status transitions of a previously acknowledged hash.
    /// The feed ends after a terminal status (or when the ledger gives up).
    async fn subscribe_to_status(&self, hash: &TransactionHash) -> Result<StatusFeed, LedgerError>;
}
