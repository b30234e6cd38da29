//! Simulated ledger with per-step scripts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::ledger::{
    Ledger, LedgerCall, LedgerError, LedgerStatus, StatusFeed, TransactionHash,
};
use crate::verification::ChallengeResponse;

use super::index::InMemoryIndex;
use super::registry::ChallengeRegistry;

/// Submission-to-finality time for steps without an explicit delay.
pub const DEFAULT_CONFIRMATION_DELAY: Duration = Duration::from_millis(200);

/// How a scripted step ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Confirm with the given call result.
    Confirm {
        /// Result reported with the confirmation.
        result: serde_json::Value,
    },
    /// Accept, assign a hash, then revert.
    Revert {
        /// Revert reason.
        reason: String,
    },
    /// Refuse at submission; no hash is assigned.
    Reject {
        /// Rejection reason.
        reason: String,
        /// Optional pre-flight revert reason.
        revert_reason: Option<String>,
    },
    /// Accept, then close the status feed without a final status.
    DropFeed,
}

/// Behaviour of one step label.
#[derive(Debug, Clone, PartialEq)]
pub struct StepScript {
    outcome: ScriptedOutcome,
    hash: Option<TransactionHash>,
    delay: Duration,
    confirmations: u32,
}

impl Default for StepScript {
    fn default() -> Self {
        Self::confirm(serde_json::json!({ "status": "success" }))
    }
}

impl StepScript {
    fn with_outcome(outcome: ScriptedOutcome) -> Self {
        Self {
            outcome,
            hash: None,
            delay: DEFAULT_CONFIRMATION_DELAY,
            confirmations: 0,
        }
    }

    /// Confirm with `result`.
    pub fn confirm(result: serde_json::Value) -> Self {
        Self::with_outcome(ScriptedOutcome::Confirm { result })
    }

    /// Revert after acceptance.
    pub fn revert(reason: impl Into<String>) -> Self {
        Self::with_outcome(ScriptedOutcome::Revert {
            reason: reason.into(),
        })
    }

    /// Reject at submission.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::with_outcome(ScriptedOutcome::Reject {
            reason: reason.into(),
            revert_reason: None,
        })
    }

    /// Reject at submission because pre-flight execution reverted.
    pub fn reject_with_revert(reason: impl Into<String>, revert_reason: impl Into<String>) -> Self {
        Self::with_outcome(ScriptedOutcome::Reject {
            reason: reason.into(),
            revert_reason: Some(revert_reason.into()),
        })
    }

    /// Accept, then lose the status feed.
    pub fn drop_feed() -> Self {
        Self::with_outcome(ScriptedOutcome::DropFeed)
    }

    /// Use a fixed transaction hash instead of a derived one.
    pub fn with_hash(mut self, hash: impl AsRef<str>) -> Self {
        self.hash = Some(TransactionHash::new(hash.as_ref()));
        self
    }

    /// Time from acknowledgment to final status.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of intermediate `Pending` statuses before the final one.
    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// The scripted outcome.
    pub fn outcome(&self) -> &ScriptedOutcome {
        &self.outcome
    }
}

/// In-memory ledger.
///
/// Looks up a [`StepScript`] by call label (falling back to the default
/// script), checks the challenge when a [`ChallengeRegistry`] is attached,
/// and hands confirmed hashes to an attached [`InMemoryIndex`].
pub struct InMemoryLedger {
    scripts: RwLock<HashMap<String, StepScript>>,
    default_script: RwLock<StepScript>,
    challenges: Option<Arc<ChallengeRegistry>>,
    index: Option<Arc<InMemoryIndex>>,
    accepted: Mutex<HashMap<TransactionHash, StepScript>>,
    submissions: AtomicUsize,
    nonce: AtomicU64,
    block_height: Arc<AtomicU64>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// A ledger that confirms everything and checks no challenges.
    pub fn new() -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            default_script: RwLock::new(StepScript::default()),
            challenges: None,
            index: None,
            accepted: Mutex::new(HashMap::new()),
            submissions: AtomicUsize::new(0),
            nonce: AtomicU64::new(0),
            block_height: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Script the step labelled `label`.
    pub fn with_script(self, label: impl Into<String>, script: StepScript) -> Self {
        self.set_script(label, script);
        self
    }

    /// Replace the fallback script.
    pub fn with_default_script(self, script: StepScript) -> Self {
        *self.default_script.write() = script;
        self
    }

    /// Require challenge responses issued through `registry`.
    pub fn with_challenges(mut self, registry: Arc<ChallengeRegistry>) -> Self {
        self.challenges = Some(registry);
        self
    }

    /// Report confirmations to `index`.
    pub fn with_index(mut self, index: Arc<InMemoryIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Script (or re-script) a label on a shared ledger.
    pub fn set_script(&self, label: impl Into<String>, script: StepScript) {
        self.scripts.write().insert(label.into(), script);
    }

    /// Number of `submit` calls received, accepted or not.
    pub fn submit_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Height of the last simulated block.
    pub fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::SeqCst)
    }

    fn script_for(&self, label: &str) -> StepScript {
        self.scripts
            .read()
            .get(label)
            .cloned()
            .unwrap_or_else(|| self.default_script.read().clone())
    }

    fn derive_hash(&self, operation_id: Uuid, label: &str) -> TransactionHash {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(operation_id.as_bytes());
        hasher.update(label.as_bytes());
        hasher.update(nonce.to_be_bytes());
        TransactionHash::new(format!("0x{}", hex::encode(hasher.finalize())))
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn submit(
        &self,
        operation_id: Uuid,
        call: &LedgerCall,
        challenge: &ChallengeResponse,
    ) -> Result<TransactionHash, LedgerError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if let Some(registry) = &self.challenges {
            registry.consume(operation_id, challenge)?;
        }

        let script = self.script_for(&call.label);
        if let ScriptedOutcome::Reject {
            reason,
            revert_reason,
        } = &script.outcome
        {
            return Err(LedgerError::Rejected {
                reason: reason.clone(),
                revert_reason: revert_reason.clone(),
            });
        }

        let hash = script
            .hash
            .clone()
            .unwrap_or_else(|| self.derive_hash(operation_id, &call.label));
        self.accepted.lock().insert(hash.clone(), script);
        Ok(hash)
    }

    async fn subscribe_to_status(&self, hash: &TransactionHash) -> Result<StatusFeed, LedgerError> {
        let script = self
            .accepted
            .lock()
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::Unavailable(format!("unknown transaction {}", hash)))?;

        let feed = Feed {
            tick: script.delay / (script.confirmations + 1),
            script,
            hash: hash.clone(),
            index: self.index.clone(),
            block_height: Arc::clone(&self.block_height),
            emitted: 0,
            done: false,
        };

        Ok(stream::unfold(feed, |mut feed| async move {
            let status = feed.next_status().await?;
            Some((status, feed))
        })
        .boxed())
    }
}

struct Feed {
    script: StepScript,
    hash: TransactionHash,
    index: Option<Arc<InMemoryIndex>>,
    block_height: Arc<AtomicU64>,
    tick: Duration,
    emitted: u32,
    done: bool,
}

impl Feed {
    async fn next_status(&mut self) -> Option<LedgerStatus> {
        if self.done {
            return None;
        }
        tokio::time::sleep(self.tick).await;

        if self.emitted < self.script.confirmations {
            self.emitted += 1;
            return Some(LedgerStatus::Pending {
                confirmations: self.emitted,
            });
        }

        self.done = true;
        match &self.script.outcome {
            ScriptedOutcome::Confirm { result } => {
                let block_number = self.block_height.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(index) = &self.index {
                    index.observe(&self.hash);
                }
                Some(LedgerStatus::Confirmed {
                    block_number,
                    result: result.clone(),
                })
            }
            ScriptedOutcome::Revert { reason } => Some(LedgerStatus::Reverted {
                reason: reason.clone(),
            }),
            ScriptedOutcome::DropFeed | ScriptedOutcome::Reject { .. } => None,
        }
    }
}
