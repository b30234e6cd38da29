//! What a lifecycle stream yields.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::{TransactionEvent, TransactionHash};

use super::error::LifecycleError;

/// Where a run is in `NotStarted → Verifying → Submitting → Indexing → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    NotStarted,
    Verifying,
    Submitting,
    Indexing,
    Done,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Verifying => "verifying",
            Self::Submitting => "submitting",
            Self::Indexing => "indexing",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// What a cancelled run leaves behind on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerWriteState {
    /// Nothing was handed to the ledger.
    NotSubmitted,
    /// At least one step was submitted and its outcome is unknown. It may
    /// land even though nobody is watching any more.
    MayStillLand,
    /// Every step confirmed. Only the indexing wait was abandoned.
    Confirmed,
}

impl fmt::Display for LedgerWriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSubmitted => "not submitted",
            Self::MayStillLand => "may still land",
            Self::Confirmed => "confirmed",
        };
        f.write_str(s)
    }
}

/// One item of the stream returned by
/// [`LifecycleCoordinator::run_lifecycle`](super::LifecycleCoordinator::run_lifecycle).
///
/// Zero or more `Transaction` events, at most one `Indexing`, and then
/// exactly one terminal event (`Success`, `PartiallyIndexed`, `Failed` or
/// `Cancelled`). Nothing follows the terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Pass-through from the transaction emitter.
    Transaction {
        event: TransactionEvent,
    },

    /// Every step confirmed; waiting for the index.
    Indexing {
        hashes: Vec<TransactionHash>,
    },

    /// Confirmed and queryable.
    Success {
        operation_id: Uuid,
        transaction_hashes: Vec<TransactionHash>,
        /// Result of the last step.
        result: serde_json::Value,
    },

    /// Confirmed, but the index had not caught up with `missing` by the
    /// deadline. The write is durable; poll again later with these hashes.
    PartiallyIndexed {
        operation_id: Uuid,
        transaction_hashes: Vec<TransactionHash>,
        missing: BTreeSet<TransactionHash>,
    },

    Failed {
        operation_id: Uuid,
        error: LifecycleError,
    },

    Cancelled {
        operation_id: Uuid,
        stage: LifecycleStage,
        ledger_write: LedgerWriteState,
        transaction_hashes: Vec<TransactionHash>,
    },
}

impl LifecycleEvent {
    /// `true` for the four terminal variants.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transaction { .. } | Self::Indexing { .. })
    }

    /// `true` when the ledger write is known to have landed: `Success` and
    /// `PartiallyIndexed`.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::PartiallyIndexed { .. })
    }

    /// Metric/log label for a terminal event.
    pub fn outcome(&self) -> Option<&'static str> {
        match self {
            Self::Success { .. } => Some("success"),
            Self::PartiallyIndexed { .. } => Some("partially_indexed"),
            Self::Failed { .. } => Some("failed"),
            Self::Cancelled { .. } => Some("cancelled"),
            Self::Transaction { .. } | Self::Indexing { .. } => None,
        }
    }

    /// The error a terminal event stands for. `None` for progress events
    /// and for the two confirmed outcomes.
    pub fn terminal_error(&self) -> Option<LifecycleError> {
        match self {
            Self::Failed { error, .. } => Some(error.clone()),
            Self::Cancelled {
                stage,
                ledger_write,
                transaction_hashes,
                ..
            } => Some(LifecycleError::OperationCancelled {
                stage: *stage,
                ledger_write: *ledger_write,
                transaction_hashes: transaction_hashes.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partially_indexed_is_confirmed_not_failed() {
        let event = LifecycleEvent::PartiallyIndexed {
            operation_id: Uuid::new_v4(),
            transaction_hashes: vec![TransactionHash::new("0xaa")],
            missing: [TransactionHash::new("0xaa")].into(),
        };
        assert!(event.is_terminal());
        assert!(event.is_confirmed());
        assert_eq!(event.outcome(), Some("partially_indexed"));
        assert!(event.terminal_error().is_none());
    }

    #[test]
    fn cancelled_maps_to_operation_cancelled() {
        let event = LifecycleEvent::Cancelled {
            operation_id: Uuid::new_v4(),
            stage: LifecycleStage::Submitting,
            ledger_write: LedgerWriteState::MayStillLand,
            transaction_hashes: vec![TransactionHash::new("0xaa")],
        };
        let err = event.terminal_error().unwrap();
        assert_eq!(err.code(), "operation_cancelled");
        assert_eq!(
            err.to_string(),
            "operation cancelled while submitting (ledger write: may still land)"
        );
    }

    #[test]
    fn ndjson_shape() {
        let event = LifecycleEvent::Indexing {
            hashes: vec![TransactionHash::new("0xAA")],
        };
        let line = serde_json::to_string(&event).unwrap();
        assert_eq!(line, r#"{"type":"indexing","hashes":["0xAA"]}"#);
        assert!(!event.is_terminal());
    }
}
