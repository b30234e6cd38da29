//! Terminal errors of a lifecycle run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{TransactionFailure, TransactionHash};
use crate::verification::VerificationError;

use super::event::{LedgerWriteState, LifecycleStage};

/// Why a lifecycle did not end in `Success` or `PartiallyIndexed`.
///
/// Indexing timeouts are deliberately absent: a confirmed write that is not
/// yet queryable is a degraded success, not an error.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LifecycleError {
    /// The operation was rejected before any external call.
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// What is wrong with it.
        reason: String,
    },

    /// Verification refused or could not run.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// A ledger step failed.
    #[error(transparent)]
    Transaction(#[from] TransactionFailure),

    /// The emitter stopped before every step reached a terminal status.
    #[error("batch incomplete: {confirmed} of {expected} steps confirmed")]
    IncompleteBatch {
        /// Steps that confirmed.
        confirmed: usize,
        /// Steps in the operation.
        expected: usize,
    },

    /// The caller cancelled. `ledger_write` says whether anything may still
    /// land on the ledger.
    #[error("operation cancelled while {stage} (ledger write: {ledger_write})")]
    OperationCancelled {
        /// Stage the run was in.
        stage: LifecycleStage,
        /// What the ledger may still do.
        ledger_write: LedgerWriteState,
        /// Hashes acknowledged before the cancel.
        transaction_hashes: Vec<TransactionHash>,
    },
}

impl LifecycleError {
    /// Short machine-readable label, used for metrics.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::InvalidOperation { .. } => "invalid_operation",
            LifecycleError::Verification(VerificationError::InvalidSecret { .. }) => {
                "invalid_secret"
            }
            LifecycleError::Verification(VerificationError::VerificationServiceUnavailable {
                ..
            }) => "verification_service_unavailable",
            LifecycleError::Transaction(TransactionFailure::LedgerSubmissionFailed { .. }) => {
                "ledger_submission_failed"
            }
            LifecycleError::Transaction(
                TransactionFailure::LedgerSubmissionRejectedAfterAccept { .. },
            ) => "ledger_submission_rejected_after_accept",
            LifecycleError::Transaction(TransactionFailure::StatusFeedUnavailable { .. }) => {
                "status_feed_unavailable"
            }
            LifecycleError::IncompleteBatch { .. } => "incomplete_batch",
            LifecycleError::OperationCancelled { .. } => "operation_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::VerificationKind;

    #[test]
    fn from_conversions_keep_the_cause() {
        let err: LifecycleError = VerificationError::InvalidSecret {
            kind: VerificationKind::Pin,
            reason: "incorrect PIN".into(),
        }
        .into();
        assert_eq!(err.code(), "invalid_secret");
        assert_eq!(err.to_string(), "invalid PIN secret: incorrect PIN");

        let err: LifecycleError = TransactionFailure::LedgerSubmissionRejectedAfterAccept {
            transaction_hash: TransactionHash::new("0xAA"),
            reason: "execution reverted".into(),
        }
        .into();
        assert_eq!(err.code(), "ledger_submission_rejected_after_accept");
    }

    #[test]
    fn serializes_with_nested_code() {
        let err = LifecycleError::from(TransactionFailure::LedgerSubmissionFailed {
            reason: "nonce too low".into(),
            revert_reason: None,
        });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "transaction");
        assert_eq!(json["detail"]["code"], "ledger_submission_failed");

        let back: LifecycleError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
