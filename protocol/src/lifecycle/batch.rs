//! Bookkeeping for the ledger steps of one run.
//!
//! A [`TransactionBatch`] is fed every emitter event while the run is
//! submitting. Once every step has confirmed it is sealed into a
//! [`ConfirmedBatch`], which has no mutators: the set of hashes the indexer
//! must see is fixed from that point on.

use serde_json::Value;

use crate::indexing::IndexingWaitRequest;
use crate::ledger::{TransactionEvent, TransactionFailure, TransactionHash};

use super::event::LedgerWriteState;

/// Steps of an operation still in flight.
#[derive(Debug)]
pub struct TransactionBatch {
    size: usize,
    announced: bool,
    acknowledged: Vec<TransactionHash>,
    confirmed: Vec<(TransactionHash, Value)>,
    failure: Option<TransactionFailure>,
}

impl TransactionBatch {
    /// Track an operation of `size` steps.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            announced: false,
            acknowledged: Vec::new(),
            confirmed: Vec::new(),
            failure: None,
        }
    }

    /// Fold one emitter event into the batch.
    pub fn record(&mut self, event: &TransactionEvent) {
        self.announced = true;
        if let Some(hash) = event.transaction_hash() {
            if !self.acknowledged.contains(hash) {
                self.acknowledged.push(hash.clone());
            }
        }
        match event {
            TransactionEvent::Pending { .. } => {}
            TransactionEvent::Confirmed {
                transaction_hash,
                result,
                ..
            } => self.confirmed.push((transaction_hash.clone(), result.clone())),
            TransactionEvent::Failed { failure, .. } => {
                if self.failure.is_none() {
                    self.failure = Some(failure.clone());
                }
            }
        }
    }

    /// Number of steps in the operation.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Steps that reached `Confirmed`.
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Hashes the ledger has acknowledged so far, in step order.
    pub fn acknowledged(&self) -> &[TransactionHash] {
        &self.acknowledged
    }

    /// First failure seen, if any.
    pub fn failure(&self) -> Option<&TransactionFailure> {
        self.failure.as_ref()
    }

    /// Whether every step confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.failure.is_none() && self.confirmed.len() == self.size
    }

    /// What the ledger may still do if the run stops watching now.
    pub fn ledger_write(&self) -> LedgerWriteState {
        if self.is_confirmed() {
            LedgerWriteState::Confirmed
        } else if self.announced {
            // A submission announced but not yet acknowledged may be in
            // flight; treat it as sent.
            LedgerWriteState::MayStillLand
        } else {
            LedgerWriteState::NotSubmitted
        }
    }

    /// Freeze a fully confirmed batch. Hands the batch back unchanged if any
    /// step is missing or failed.
    pub fn seal(self) -> Result<ConfirmedBatch, Self> {
        if !self.is_confirmed() {
            return Err(self);
        }
        let result = self
            .confirmed
            .last()
            .map(|(_, result)| result.clone())
            .unwrap_or(Value::Null);
        Ok(ConfirmedBatch {
            hashes: self.confirmed.into_iter().map(|(hash, _)| hash).collect(),
            result,
        })
    }
}

/// Every step confirmed on the ledger. Read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedBatch {
    hashes: Vec<TransactionHash>,
    result: Value,
}

impl ConfirmedBatch {
    /// Confirmed hashes in step order.
    pub fn hashes(&self) -> &[TransactionHash] {
        &self.hashes
    }

    /// Result reported by the ledger for the last step.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// The set the indexer has to catch up with.
    pub fn wait_request(&self) -> IndexingWaitRequest {
        IndexingWaitRequest::new(self.hashes.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(step: usize, hash: Option<&str>) -> TransactionEvent {
        TransactionEvent::Pending {
            step,
            label: format!("step{}", step),
            message: String::new(),
            transaction_hash: hash.map(TransactionHash::new),
        }
    }

    fn confirmed(step: usize, hash: &str, result: Value) -> TransactionEvent {
        TransactionEvent::Confirmed {
            step,
            label: format!("step{}", step),
            message: String::new(),
            transaction_hash: TransactionHash::new(hash),
            result,
        }
    }

    #[test]
    fn seals_only_when_every_step_confirmed() {
        let mut batch = TransactionBatch::new(2);
        assert_eq!(batch.ledger_write(), LedgerWriteState::NotSubmitted);

        batch.record(&pending(0, None));
        assert_eq!(batch.ledger_write(), LedgerWriteState::MayStillLand);
        batch.record(&pending(0, Some("0xaa")));
        batch.record(&confirmed(0, "0xaa", json!({"approved": true})));

        let batch = batch.seal().unwrap_err();
        assert_eq!(batch.confirmed_count(), 1);

        let mut batch = batch;
        batch.record(&pending(1, Some("0xbb")));
        batch.record(&confirmed(1, "0xbb", json!({"executed": 7})));
        assert_eq!(batch.ledger_write(), LedgerWriteState::Confirmed);

        let sealed = batch.seal().unwrap();
        assert_eq!(
            sealed.hashes(),
            &[TransactionHash::new("0xaa"), TransactionHash::new("0xbb")]
        );
        assert_eq!(sealed.result(), &json!({"executed": 7}));
        assert_eq!(sealed.wait_request().hashes.len(), 2);
    }

    #[test]
    fn failure_prevents_sealing() {
        let mut batch = TransactionBatch::new(1);
        batch.record(&pending(0, Some("0xaa")));
        batch.record(&TransactionEvent::Failed {
            step: 0,
            label: "step0".into(),
            message: String::new(),
            transaction_hash: Some(TransactionHash::new("0xaa")),
            failure: TransactionFailure::LedgerSubmissionRejectedAfterAccept {
                transaction_hash: TransactionHash::new("0xaa"),
                reason: "reverted".into(),
            },
        });

        assert!(batch.failure().is_some());
        assert_eq!(batch.acknowledged(), &[TransactionHash::new("0xaa")]);
        assert!(batch.seal().is_err());
    }
}
