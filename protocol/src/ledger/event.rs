//! Events produced by the [`TransactionEmitter`](super::TransactionEmitter).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TransactionHash;

/// Why a ledger step ended in `Failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum TransactionFailure {
    /// The ledger refused the submission; no hash was ever assigned.
    #[error("ledger submission failed: {reason}")]
    LedgerSubmissionFailed {
        /// Why the ledger refused.
        reason: String,
        /// Revert reason from pre-flight execution, when the ledger gave one.
        revert_reason: Option<String>,
    },

    /// The ledger acknowledged the submission and later rejected it.
    #[error("transaction {transaction_hash} rejected after acceptance: {reason}")]
    LedgerSubmissionRejectedAfterAccept {
        /// Hash the ledger assigned at acceptance.
        transaction_hash: TransactionHash,
        /// Revert reason.
        reason: String,
    },

    /// We have a hash but lost sight of it before it reached a final status.
    #[error("status of {transaction_hash} unavailable: {reason}")]
    StatusFeedUnavailable {
        /// Hash whose status is unknown.
        transaction_hash: TransactionHash,
        /// What went wrong with the feed.
        reason: String,
    },
}

/// One entry of a transaction's lifecycle.
///
/// For any given step the emitter produces zero or more `Pending` events
/// followed by exactly one `Confirmed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionEvent {
    /// Submitted or awaiting confirmation. The hash is absent until the
    /// ledger acknowledges the submission.
    Pending {
        /// Zero-based step index within the operation.
        step: usize,
        /// Step label.
        label: String,
        /// Progress message for the user.
        message: String,
        /// Hash, once known.
        transaction_hash: Option<TransactionHash>,
    },
    /// Final and successful.
    Confirmed {
        /// Zero-based step index within the operation.
        step: usize,
        /// Step label.
        label: String,
        /// Progress message for the user.
        message: String,
        /// Hash of the confirmed transaction.
        transaction_hash: TransactionHash,
        /// Call result as reported by the ledger.
        result: serde_json::Value,
    },
    /// Final and unsuccessful. A hash may exist: reverted transactions
    /// have one and are still failures.
    Failed {
        /// Zero-based step index within the operation.
        step: usize,
        /// Step label.
        label: String,
        /// Progress message for the user.
        message: String,
        /// Hash, if the ledger ever assigned one.
        transaction_hash: Option<TransactionHash>,
        /// Classified cause.
        failure: TransactionFailure,
    },
}

impl TransactionEvent {
    /// Step index this event belongs to.
    pub fn step(&self) -> usize {
        match self {
            Self::Pending { step, .. } | Self::Confirmed { step, .. } | Self::Failed { step, .. } => {
                *step
            }
        }
    }

    /// Step label this event belongs to.
    pub fn label(&self) -> &str {
        match self {
            Self::Pending { label, .. }
            | Self::Confirmed { label, .. }
            | Self::Failed { label, .. } => label,
        }
    }

    /// Progress message.
    pub fn message(&self) -> &str {
        match self {
            Self::Pending { message, .. }
            | Self::Confirmed { message, .. }
            | Self::Failed { message, .. } => message,
        }
    }

    /// Transaction hash, if known at this point.
    pub fn transaction_hash(&self) -> Option<&TransactionHash> {
        match self {
            Self::Pending {
                transaction_hash, ..
            }
            | Self::Failed {
                transaction_hash, ..
            } => transaction_hash.as_ref(),
            Self::Confirmed {
                transaction_hash, ..
            } => Some(transaction_hash),
        }
    }

    /// `true` for `Confirmed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverted_event_has_hash_and_is_terminal() {
        let hash = TransactionHash::new("0xbeef");
        let event = TransactionEvent::Failed {
            step: 1,
            label: "execute".into(),
            message: "execute reverted".into(),
            transaction_hash: Some(hash.clone()),
            failure: TransactionFailure::LedgerSubmissionRejectedAfterAccept {
                transaction_hash: hash.clone(),
                reason: "insufficient allowance".into(),
            },
        };
        assert!(event.is_terminal());
        assert_eq!(event.transaction_hash(), Some(&hash));
        assert_eq!(event.step(), 1);
        assert_eq!(event.label(), "execute");
    }

    #[test]
    fn pending_is_not_terminal() {
        let event = TransactionEvent::Pending {
            step: 0,
            label: "mint".into(),
            message: "submitting mint".into(),
            transaction_hash: None,
        };
        assert!(!event.is_terminal());
        assert!(event.transaction_hash().is_none());
    }

    #[test]
    fn events_serialize_with_status_tag() {
        let event = TransactionEvent::Confirmed {
            step: 0,
            label: "mint".into(),
            message: "mint confirmed".into(),
            transaction_hash: TransactionHash::new("0xAA"),
            result: serde_json::json!({"ok": true}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["transaction_hash"], "0xAA");
    }
}
