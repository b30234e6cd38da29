//! # Transaction Emitter
//!
//! Drives the ledger calls of one [`Operation`] strictly in sequence and
//! exposes their progress as a lazy, finite, non-restartable stream.
//!
//! The stream is an explicit state machine folded with
//! [`futures::stream::unfold`]: each poll advances one phase and yields at
//! most one event. Nothing runs unless the consumer polls, nothing is
//! spawned, and dropping the stream abandons whatever is in flight. A
//! submission the ledger already accepted will still land; we just stop
//! watching.
//!
//! ## Phases per step
//!
//! ```text
//! Announce ─► Submit ─► Subscribe ─► Track ─► (next step's Announce | Finished)
//! ```

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::verification::ChallengeResponse;

use super::event::{TransactionEvent, TransactionFailure};
use super::types::{Ledger, LedgerCall, LedgerError, LedgerStatus, Operation, StatusFeed, TransactionHash};

/// The event stream returned by [`TransactionEmitter::emit`].
pub type TransactionStream = BoxStream<'static, TransactionEvent>;

/// Submits operations to a [`Ledger`] and reports their lifecycle.
///
/// Holds no per-operation state; every [`emit`](Self::emit) is independent.
#[derive(Clone)]
pub struct TransactionEmitter {
    ledger: Arc<dyn Ledger>,
}

impl TransactionEmitter {
    /// Create an emitter for `ledger`.
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Submit `operation`, authorized by `challenge`, and stream its events.
    ///
    /// The challenge is moved in and consumed by this operation. Every step
    /// of the operation presents it; the ledger binds it to `operation_id`.
    pub fn emit(
        &self,
        operation_id: Uuid,
        operation: Operation,
        challenge: ChallengeResponse,
    ) -> TransactionStream {
        let emission = Emission {
            ledger: Arc::clone(&self.ledger),
            operation_id,
            steps: operation.steps,
            challenge,
            phase: Phase::Announce(0),
        };

        stream::unfold(emission, |mut emission| async move {
            let event = emission.advance().await?;
            Some((event, emission))
        })
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// State Machine
// ---------------------------------------------------------------------------

enum Phase {
    /// Tell the consumer we are about to submit step `n`.
    Announce(usize),
    /// Submit step `n` and wait for the ledger's acknowledgment.
    Submit(usize),
    /// Open the confirmation feed for an acknowledged step.
    Subscribe { step: usize, hash: TransactionHash },
    /// Relay the confirmation feed until a terminal status.
    Track {
        step: usize,
        hash: TransactionHash,
        feed: StatusFeed,
    },
    /// Terminal event emitted (or all steps confirmed). Nothing more to say.
    Finished,
}

struct Emission {
    ledger: Arc<dyn Ledger>,
    operation_id: Uuid,
    steps: Vec<LedgerCall>,
    challenge: ChallengeResponse,
    phase: Phase,
}

impl Emission {
    /// Advance one phase. `None` ends the stream.
    async fn advance(&mut self) -> Option<TransactionEvent> {
        loop {
            break match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Announce(step) => {
                    let call = self.steps.get(step)?;
                    self.phase = Phase::Submit(step);
                    Some(TransactionEvent::Pending {
                        step,
                        label: call.label.clone(),
                        message: format!("Submitting {}", call.label),
                        transaction_hash: None,
                    })
                }

                Phase::Submit(step) => {
                    let call = self.steps.get(step)?;
                    let label = call.label.clone();
                    match self
                        .ledger
                        .submit(self.operation_id, call, &self.challenge)
                        .await
                    {
                        Ok(hash) => {
                            info!(
                                operation_id = %self.operation_id,
                                step,
                                label = %label,
                                tx_hash = %hash,
                                "ledger accepted submission"
                            );
                            self.phase = Phase::Subscribe {
                                step,
                                hash: hash.clone(),
                            };
                            Some(TransactionEvent::Pending {
                                step,
                                message: format!("{} submitted, waiting for confirmation", label),
                                label,
                                transaction_hash: Some(hash),
                            })
                        }
                        Err(e) => {
                            warn!(
                                operation_id = %self.operation_id,
                                step,
                                label = %label,
                                error = %e,
                                "ledger refused submission"
                            );
                            let failure = match e {
                                LedgerError::Rejected {
                                    reason,
                                    revert_reason,
                                } => TransactionFailure::LedgerSubmissionFailed {
                                    reason,
                                    revert_reason,
                                },
                                LedgerError::Unavailable(reason) => {
                                    TransactionFailure::LedgerSubmissionFailed {
                                        reason,
                                        revert_reason: None,
                                    }
                                }
                            };
                            Some(TransactionEvent::Failed {
                                step,
                                message: format!("{} could not be submitted", label),
                                label,
                                transaction_hash: None,
                                failure,
                            })
                        }
                    }
                }

                Phase::Subscribe { step, hash } => {
                    let label = self.steps.get(step)?.label.clone();
                    match self.ledger.subscribe_to_status(&hash).await {
                        Ok(feed) => {
                            // Subscribing yields nothing on its own; go straight
                            // to the first status.
                            self.phase = Phase::Track { step, hash, feed };
                            continue;
                        }
                        Err(e) => {
                            warn!(operation_id = %self.operation_id, tx_hash = %hash, error = %e, "status subscription failed");
                            Some(status_lost(step, label, hash, e.to_string()))
                        }
                    }
                }

                Phase::Track {
                    step,
                    hash,
                    mut feed,
                } => {
                    let label = self.steps.get(step)?.label.clone();
                    match feed.next().await {
                        Some(LedgerStatus::Pending { confirmations }) => {
                            debug!(operation_id = %self.operation_id, tx_hash = %hash, confirmations, "awaiting finality");
                            self.phase = Phase::Track {
                                step,
                                hash: hash.clone(),
                                feed,
                            };
                            Some(TransactionEvent::Pending {
                                step,
                                message: format!("{} pending ({} confirmations)", label, confirmations),
                                label,
                                transaction_hash: Some(hash),
                            })
                        }
                        Some(LedgerStatus::Confirmed {
                            block_number,
                            result,
                        }) => {
                            info!(
                                operation_id = %self.operation_id,
                                step,
                                tx_hash = %hash,
                                block_number,
                                "transaction confirmed"
                            );
                            self.phase = Phase::Announce(step + 1);
                            Some(TransactionEvent::Confirmed {
                                step,
                                message: format!("{} confirmed in block {}", label, block_number),
                                label,
                                transaction_hash: hash,
                                result,
                            })
                        }
                        Some(LedgerStatus::Reverted { reason }) => {
                            warn!(
                                operation_id = %self.operation_id,
                                step,
                                tx_hash = %hash,
                                reason = %reason,
                                "transaction reverted after acceptance"
                            );
                            Some(TransactionEvent::Failed {
                                step,
                                message: format!("{} reverted", label),
                                label,
                                transaction_hash: Some(hash.clone()),
                                failure: TransactionFailure::LedgerSubmissionRejectedAfterAccept {
                                    transaction_hash: hash,
                                    reason,
                                },
                            })
                        }
                        None => {
                            warn!(operation_id = %self.operation_id, tx_hash = %hash, "status feed closed before finality");
                            Some(status_lost(
                                step,
                                label,
                                hash,
                                "status feed closed before a final status".to_string(),
                            ))
                        }
                    }
                }

                Phase::Finished => None,
            };
        }
    }
}

fn status_lost(step: usize, label: String, hash: TransactionHash, reason: String) -> TransactionEvent {
    TransactionEvent::Failed {
        step,
        message: format!("lost track of {}", label),
        label,
        transaction_hash: Some(hash.clone()),
        failure: TransactionFailure::StatusFeedUnavailable {
            transaction_hash: hash,
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{InMemoryLedger, StepScript};
    use serde_json::json;

    async fn collect(stream: TransactionStream) -> Vec<TransactionEvent> {
        stream.collect().await
    }

    fn terminal_count(events: &[TransactionEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test(start_paused = true)]
    async fn single_step_confirms() {
        let ledger = Arc::new(InMemoryLedger::new().with_script(
            "mint",
            StepScript::confirm(json!({"minted": 100})).with_hash("0xAA"),
        ));
        let emitter = TransactionEmitter::new(ledger.clone());

        let events = collect(emitter.emit(
            Uuid::new_v4(),
            Operation::single("mint", json!({})),
            ChallengeResponse::none(),
        ))
        .await;

        assert!(matches!(
            &events[0],
            TransactionEvent::Pending { transaction_hash: None, .. }
        ));
        assert_eq!(
            events[1].transaction_hash(),
            Some(&TransactionHash::new("0xAA"))
        );
        match events.last().unwrap() {
            TransactionEvent::Confirmed {
                transaction_hash,
                result,
                ..
            } => {
                assert_eq!(transaction_hash, &TransactionHash::new("0xAA"));
                assert_eq!(result, &json!({"minted": 100}));
            }
            other => panic!("expected Confirmed, got {:?}", other),
        }
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(ledger.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_step_gets_exactly_one_terminal() {
        let ledger = Arc::new(InMemoryLedger::new());
        let emitter = TransactionEmitter::new(ledger.clone());
        let operation = Operation::new("batch")
            .step("one", json!({}))
            .step("two", json!({}))
            .step("three", json!({}));

        let events = collect(emitter.emit(Uuid::new_v4(), operation, ChallengeResponse::none())).await;

        assert_eq!(terminal_count(&events), 3);
        assert!(events.last().unwrap().is_terminal());
        for step in 0..3 {
            let for_step: Vec<_> = events.iter().filter(|e| e.step() == step).collect();
            assert!(for_step.last().unwrap().is_terminal());
            assert_eq!(for_step.iter().filter(|e| e.is_terminal()).count(), 1);
        }
        // Steps never interleave.
        let steps: Vec<_> = events.iter().map(|e| e.step()).collect();
        let mut sorted = steps.clone();
        sorted.sort();
        assert_eq!(steps, sorted);
    }

    #[tokio::test(start_paused = true)]
    async fn revert_after_accept_is_failed_with_hash() {
        let ledger = Arc::new(InMemoryLedger::new().with_script(
            "execute",
            StepScript::revert("insufficient allowance").with_hash("0xBB"),
        ));
        let emitter = TransactionEmitter::new(ledger.clone());
        let operation = Operation::new("swap")
            .step("approve", json!({}))
            .step("execute", json!({}));

        let events = collect(emitter.emit(Uuid::new_v4(), operation, ChallengeResponse::none())).await;

        assert_eq!(events.first().unwrap().label(), "approve");
        assert!(matches!(
            events.iter().find(|e| e.label() == "approve" && e.is_terminal()),
            Some(TransactionEvent::Confirmed { .. })
        ));

        match events.last().unwrap() {
            TransactionEvent::Failed {
                transaction_hash,
                failure,
                label,
                ..
            } => {
                assert_eq!(label, "execute");
                assert_eq!(transaction_hash, &Some(TransactionHash::new("0xBB")));
                assert!(matches!(
                    failure,
                    TransactionFailure::LedgerSubmissionRejectedAfterAccept { reason, .. }
                        if reason == "insufficient allowance"
                ));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(terminal_count(&events), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_stops_remaining_steps() {
        let ledger = Arc::new(
            InMemoryLedger::new().with_script("approve", StepScript::reject("nonce too low")),
        );
        let emitter = TransactionEmitter::new(ledger.clone());
        let operation = Operation::new("swap")
            .step("approve", json!({}))
            .step("execute", json!({}));

        let events = collect(emitter.emit(Uuid::new_v4(), operation, ChallengeResponse::none())).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            TransactionEvent::Failed {
                transaction_hash: None,
                failure: TransactionFailure::LedgerSubmissionFailed { .. },
                ..
            }
        ));
        assert!(events.iter().all(|e| e.label() == "approve"));
        assert_eq!(ledger.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn intermediate_confirmations_are_forwarded() {
        let ledger = Arc::new(
            InMemoryLedger::new().with_script("mint", StepScript::confirm(json!(null)).with_confirmations(3)),
        );
        let emitter = TransactionEmitter::new(ledger);

        let events = collect(emitter.emit(
            Uuid::new_v4(),
            Operation::single("mint", json!({})),
            ChallengeResponse::none(),
        ))
        .await;

        // announce + ack + 3 confirmations + confirmed
        assert_eq!(events.len(), 6);
        assert!(events[..5].iter().all(|e| !e.is_terminal()));
        assert!(events[2..5].iter().all(|e| e.transaction_hash().is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_feed_is_a_failure_not_silence() {
        let ledger = Arc::new(
            InMemoryLedger::new().with_script("mint", StepScript::drop_feed().with_hash("0xCC")),
        );
        let emitter = TransactionEmitter::new(ledger);

        let events = collect(emitter.emit(
            Uuid::new_v4(),
            Operation::single("mint", json!({})),
            ChallengeResponse::none(),
        ))
        .await;

        assert!(matches!(
            events.last().unwrap(),
            TransactionEvent::Failed {
                failure: TransactionFailure::StatusFeedUnavailable { .. },
                transaction_hash: Some(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_is_lazy() {
        let ledger = Arc::new(InMemoryLedger::new());
        let emitter = TransactionEmitter::new(ledger.clone());

        let stream = emitter.emit(
            Uuid::new_v4(),
            Operation::single("mint", json!({})),
            ChallengeResponse::none(),
        );
        assert_eq!(ledger.submit_count(), 0);
        drop(stream);
        assert_eq!(ledger.submit_count(), 0);
    }
}
