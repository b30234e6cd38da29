//! # Lifecycle Coordinator
//!
//! Composes verification, submission and indexing into one stream:
//!
//! ```text
//! NotStarted ─► Verifying ─► Submitting ─► Indexing ─► Done
//!                   │             │            │
//!                   └─────────────┴────────────┴──► Done(Failed | Cancelled)
//! ```
//!
//! Like the emitter, a run is an explicit state machine driven by
//! [`futures::stream::unfold`]. Emitter events are passed through as they
//! arrive; the coordinator only adds the `Indexing` marker and the single
//! terminal event. No task is spawned, so dropping the stream stops the run
//! at its next suspension point.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::Cancellation;
use crate::config::LifecycleConfig;
use crate::indexing::{IndexReader, IndexingError, IndexingWaiter};
use crate::ledger::{Ledger, Operation, TransactionEmitter, TransactionHash, TransactionStream};
use crate::verification::{
    ChallengeResponder, ChallengeResponse, VerificationContext, VerificationRequest,
    VerificationService,
};

use super::batch::{ConfirmedBatch, TransactionBatch};
use super::error::LifecycleError;
use super::event::{LedgerWriteState, LifecycleEvent, LifecycleStage};

/// The stream returned by [`LifecycleCoordinator::run_lifecycle`].
pub type LifecycleStream = BoxStream<'static, LifecycleEvent>;

/// Entry point for state-changing operations.
///
/// Holds only collaborator handles and configuration; every run gets its
/// own operation id, challenge and batch.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    responder: ChallengeResponder,
    emitter: TransactionEmitter,
    waiter: IndexingWaiter,
    config: LifecycleConfig,
}

impl LifecycleCoordinator {
    /// Wire a coordinator to its three collaborators.
    pub fn new(
        verifier: Arc<dyn VerificationService>,
        ledger: Arc<dyn Ledger>,
        index: Arc<dyn IndexReader>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            responder: ChallengeResponder::new(verifier),
            emitter: TransactionEmitter::new(ledger),
            waiter: IndexingWaiter::new(index, &config),
            config,
        }
    }

    /// The configuration this coordinator was built with. `run` takes its
    /// indexing timeout from here.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Run `operation` with the configured indexing timeout and no
    /// cancellation.
    pub fn run(
        &self,
        operation: Operation,
        verification: Option<VerificationRequest>,
    ) -> LifecycleStream {
        self.run_lifecycle(
            operation,
            verification,
            self.config.indexing_timeout(),
            Cancellation::never(),
        )
    }

    /// Run `operation` end to end.
    ///
    /// `verification` may be `None` for ledgers that need no challenge.
    /// `indexing_timeout` bounds the wait for the read model only; ledger
    /// confirmation is bounded by `cancel`.
    ///
    /// The stream is lazy: nothing is verified or submitted until it is
    /// polled.
    pub fn run_lifecycle(
        &self,
        operation: Operation,
        verification: Option<VerificationRequest>,
        indexing_timeout: Duration,
        cancel: Cancellation,
    ) -> LifecycleStream {
        let operation_id = Uuid::new_v4();
        let run = Run {
            responder: self.responder.clone(),
            emitter: self.emitter.clone(),
            waiter: self.waiter.clone(),
            operation_id,
            indexing_timeout,
            cancel,
            started: Instant::now(),
            stage: LifecycleStage::NotStarted,
            phase: RunPhase::Verify {
                operation,
                verification,
            },
        };

        stream::unfold(run, |mut run| async move {
            let event = run.advance().await?;
            Some((event, run))
        })
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// State Machine
// ---------------------------------------------------------------------------

enum RunPhase {
    Verify {
        operation: Operation,
        verification: Option<VerificationRequest>,
    },
    Submit {
        events: TransactionStream,
        batch: TransactionBatch,
    },
    Index {
        batch: ConfirmedBatch,
    },
    Done,
}

struct Run {
    responder: ChallengeResponder,
    emitter: TransactionEmitter,
    waiter: IndexingWaiter,
    operation_id: Uuid,
    indexing_timeout: Duration,
    cancel: Cancellation,
    started: Instant,
    stage: LifecycleStage,
    phase: RunPhase,
}

impl Run {
    fn enter(&mut self, stage: LifecycleStage) {
        debug!(
            operation_id = %self.operation_id,
            from = %self.stage,
            to = %stage,
            "lifecycle stage change"
        );
        self.stage = stage;
    }

    fn failed(&mut self, error: LifecycleError) -> LifecycleEvent {
        warn!(
            operation_id = %self.operation_id,
            stage = %self.stage,
            error = %error,
            "lifecycle failed"
        );
        self.enter(LifecycleStage::Done);
        LifecycleEvent::Failed {
            operation_id: self.operation_id,
            error,
        }
    }

    fn cancelled(
        &mut self,
        ledger_write: LedgerWriteState,
        transaction_hashes: Vec<TransactionHash>,
    ) -> LifecycleEvent {
        let stage = self.stage;
        info!(
            operation_id = %self.operation_id,
            %stage,
            %ledger_write,
            "lifecycle cancelled"
        );
        self.enter(LifecycleStage::Done);
        LifecycleEvent::Cancelled {
            operation_id: self.operation_id,
            stage,
            ledger_write,
            transaction_hashes,
        }
    }

    /// Advance until the next event. `None` once the terminal event is out.
    async fn advance(&mut self) -> Option<LifecycleEvent> {
        loop {
            break match std::mem::replace(&mut self.phase, RunPhase::Done) {
                RunPhase::Verify {
                    operation,
                    verification,
                } => {
                    self.enter(LifecycleStage::Verifying);
                    if let Err(reason) = operation.validate() {
                        Some(self.failed(LifecycleError::InvalidOperation { reason }))
                    } else if self.cancel.is_cancelled() {
                        Some(self.cancelled(LedgerWriteState::NotSubmitted, Vec::new()))
                    } else {
                        let challenge = obtain_challenge(
                            &self.responder,
                            &self.cancel,
                            self.operation_id,
                            &operation,
                            verification,
                        );
                        match challenge.await {
                            Ok(challenge) => {
                                self.enter(LifecycleStage::Submitting);
                                let batch = TransactionBatch::new(operation.steps.len());
                                let events = self.emitter.emit(self.operation_id, operation, challenge);
                                self.phase = RunPhase::Submit { events, batch };
                                continue;
                            }
                            Err(Some(error)) => Some(self.failed(error)),
                            Err(None) => {
                                Some(self.cancelled(LedgerWriteState::NotSubmitted, Vec::new()))
                            }
                        }
                    }
                }

                RunPhase::Submit { mut events, mut batch } => {
                    // Once a step has failed the emitter is about to end; let
                    // the failure win over a late cancel.
                    let watching = batch.failure().is_none();
                    let cancel = self.cancel.clone();
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled(), if watching => None,
                        next = events.next() => Some(next),
                    };

                    match next {
                        None => {
                            let hashes = batch.acknowledged().to_vec();
                            Some(self.cancelled(batch.ledger_write(), hashes))
                        }
                        Some(Some(event)) => {
                            batch.record(&event);
                            self.phase = RunPhase::Submit { events, batch };
                            Some(LifecycleEvent::Transaction { event })
                        }
                        Some(None) => {
                            if let Some(failure) = batch.failure().cloned() {
                                Some(self.failed(failure.into()))
                            } else {
                                match batch.seal() {
                                    Ok(batch) => {
                                        self.enter(LifecycleStage::Indexing);
                                        let hashes = batch.hashes().to_vec();
                                        self.phase = RunPhase::Index { batch };
                                        Some(LifecycleEvent::Indexing { hashes })
                                    }
                                    Err(batch) => Some(self.failed(LifecycleError::IncompleteBatch {
                                        confirmed: batch.confirmed_count(),
                                        expected: batch.size(),
                                    })),
                                }
                            }
                        }
                    }
                }

                RunPhase::Index { batch } => {
                    let outcome = self
                        .waiter
                        .wait_for(batch.wait_request(), self.indexing_timeout, &self.cancel)
                        .await;
                    let transaction_hashes = batch.hashes().to_vec();
                    match outcome {
                        Ok(report) => {
                            info!(
                                operation_id = %self.operation_id,
                                polls = report.polls,
                                elapsed_ms = self.started.elapsed().as_millis() as u64,
                                "lifecycle succeeded"
                            );
                            self.enter(LifecycleStage::Done);
                            Some(LifecycleEvent::Success {
                                operation_id: self.operation_id,
                                transaction_hashes,
                                result: batch.result().clone(),
                            })
                        }
                        Err(IndexingError::IndexingTimeout { missing, polls, .. }) => {
                            warn!(
                                operation_id = %self.operation_id,
                                polls,
                                missing = missing.len(),
                                "confirmed but not fully indexed"
                            );
                            self.enter(LifecycleStage::Done);
                            Some(LifecycleEvent::PartiallyIndexed {
                                operation_id: self.operation_id,
                                transaction_hashes,
                                missing,
                            })
                        }
                        Err(IndexingError::Cancelled { .. }) => {
                            Some(self.cancelled(LedgerWriteState::Confirmed, transaction_hashes))
                        }
                    }
                }

                RunPhase::Done => None,
            };
        }
    }
}

/// Obtain the challenge for a run. `Err(None)` means cancelled.
///
/// Borrows only the responder and the cancel signal: the run itself holds
/// the emitter stream and cannot be shared across an await.
async fn obtain_challenge(
    responder: &ChallengeResponder,
    cancel: &Cancellation,
    operation_id: Uuid,
    operation: &Operation,
    verification: Option<VerificationRequest>,
) -> Result<ChallengeResponse, Option<LifecycleError>> {
    let Some(request) = verification else {
        debug!(%operation_id, "no verification requested");
        return Ok(ChallengeResponse::none());
    };

    let context = VerificationContext {
        operation_id,
        operation_kind: operation.kind.clone(),
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(None),
        result = responder.respond(request, &context) => {
            result.map_err(|e| Some(LifecycleError::from(e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;
    use crate::ledger::TransactionEvent;
    use crate::sim::{Devnet, DevnetConfig, StepScript};
    use serde_json::json;

    fn config() -> LifecycleConfig {
        LifecycleConfig::default()
            .with_poll_interval(Duration::from_millis(500))
            .with_poll_jitter(Duration::ZERO)
    }

    fn devnet() -> Devnet {
        Devnet::new(DevnetConfig::default())
    }

    async fn collect(stream: LifecycleStream) -> Vec<LifecycleEvent> {
        stream.collect().await
    }

    #[tokio::test(start_paused = true)]
    async fn success_passes_events_through_then_indexes() {
        let net = devnet();
        net.ledger
            .set_script("mint", StepScript::confirm(json!({"minted": 5})).with_hash("0xAA"));
        let coordinator = net.coordinator(config());

        let events = collect(coordinator.run(
            Operation::single("mint", json!({"amount": 5})),
            Some(VerificationRequest::pin("123456")),
        ))
        .await;

        assert!(matches!(
            &events[0],
            LifecycleEvent::Transaction { event: TransactionEvent::Pending { transaction_hash: None, .. } }
        ));
        assert!(matches!(&events[2], LifecycleEvent::Transaction { event: TransactionEvent::Confirmed { .. } }));
        assert_eq!(
            events[3],
            LifecycleEvent::Indexing {
                hashes: vec![TransactionHash::new("0xAA")]
            }
        );
        match events.last().unwrap() {
            LifecycleEvent::Success {
                transaction_hashes,
                result,
                ..
            } => {
                assert_eq!(transaction_hashes, &vec![TransactionHash::new("0xAA")]);
                assert_eq!(result, &json!({"minted": 5}));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_operation_fails_without_external_calls() {
        let net = devnet();
        let coordinator = net.coordinator(config());

        let events = collect(coordinator.run(
            Operation::new("noop"),
            Some(VerificationRequest::pin("123456")),
        ))
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LifecycleEvent::Failed {
                error: LifecycleError::InvalidOperation { .. },
                ..
            }
        ));
        assert_eq!(net.verifier.call_count(), 0);
        assert_eq!(net.ledger.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn verifier_outage_is_terminal() {
        let net = devnet();
        net.verifier.set_available(false);
        let coordinator = net.coordinator(config());

        let events = collect(coordinator.run(
            Operation::single("mint", json!({})),
            Some(VerificationRequest::pin("123456")),
        ))
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].terminal_error().map(|e| e.code()),
            Some("verification_service_unavailable")
        );
        assert_eq!(net.ledger.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_verification_sends_empty_challenge() {
        let net = Devnet::new(DevnetConfig {
            require_challenge: false,
            ..DevnetConfig::default()
        });
        let coordinator = net.coordinator(config());

        let events = collect(coordinator.run(Operation::single("mint", json!({})), None)).await;
        assert!(matches!(events.last(), Some(LifecycleEvent::Success { .. })));
        assert_eq!(net.verifier.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unverified_run_is_refused_when_ledger_wants_a_challenge() {
        let net = devnet();
        let coordinator = net.coordinator(config());

        let events = collect(coordinator.run(Operation::single("mint", json!({})), None)).await;
        assert_eq!(
            events.last().and_then(|e| e.terminal_error()).map(|e| e.code()),
            Some("ledger_submission_failed")
        );
        assert_eq!(net.index.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_polling_submits_nothing() {
        let net = devnet();
        let coordinator = net.coordinator(config());
        let (handle, signal) = cancellation();
        handle.cancel();

        let events = collect(coordinator.run_lifecycle(
            Operation::single("mint", json!({})),
            Some(VerificationRequest::pin("123456")),
            Duration::from_secs(5),
            signal,
        ))
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            LifecycleEvent::Cancelled {
                stage: LifecycleStage::Verifying,
                ledger_write: LedgerWriteState::NotSubmitted,
                ..
            }
        ));
        assert_eq!(net.verifier.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_confirming_may_still_land() {
        let net = devnet();
        net.ledger.set_script(
            "mint",
            StepScript::default()
                .with_hash("0xaa")
                .with_delay(Duration::from_secs(10)),
        );
        let coordinator = net.coordinator(config());
        let (handle, signal) = cancellation();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.cancel();
        });

        let events = collect(coordinator.run_lifecycle(
            Operation::single("mint", json!({})),
            Some(VerificationRequest::pin("123456")),
            Duration::from_secs(5),
            signal,
        ))
        .await;

        match events.last().unwrap() {
            LifecycleEvent::Cancelled {
                stage,
                ledger_write,
                transaction_hashes,
                ..
            } => {
                assert_eq!(*stage, LifecycleStage::Submitting);
                assert_eq!(*ledger_write, LedgerWriteState::MayStillLand);
                assert_eq!(transaction_hashes, &vec![TransactionHash::new("0xaa")]);
            }
            other => panic!("expected cancelled, got {:?}", other),
        }
        assert_eq!(net.index.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_indexing_reports_confirmed_write() {
        let net = devnet();
        net.index.hide("0xaa");
        net.ledger
            .set_script("mint", StepScript::default().with_hash("0xaa"));
        let coordinator = net.coordinator(config());
        let (handle, signal) = cancellation();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            handle.cancel();
        });

        let events = collect(coordinator.run_lifecycle(
            Operation::single("mint", json!({})),
            Some(VerificationRequest::pin("123456")),
            Duration::from_secs(30),
            signal,
        ))
        .await;

        assert!(matches!(
            events.last(),
            Some(LifecycleEvent::Cancelled {
                stage: LifecycleStage::Indexing,
                ledger_write: LedgerWriteState::Confirmed,
                ..
            })
        ));
        let polls = net.index.query_count();
        assert!(polls > 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(net.index.query_count(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_can_be_driven_from_a_spawned_task() {
        let net = devnet();
        let coordinator = net.coordinator(config());
        let stream = coordinator.run(
            Operation::single("mint", json!({})),
            Some(VerificationRequest::pin("123456")),
        );

        let events = tokio::spawn(collect(stream)).await.unwrap();
        assert!(matches!(events.last(), Some(LifecycleEvent::Success { .. })));
        assert_eq!(net.verifier.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_is_lazy() {
        let net = devnet();
        let coordinator = net.coordinator(config());

        let stream = coordinator.run(
            Operation::single("mint", json!({})),
            Some(VerificationRequest::pin("123456")),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(net.verifier.call_count(), 0);
        drop(stream);
        assert_eq!(net.ledger.submit_count(), 0);
    }
}
