//! # Simulated Devnet
//!
//! In-memory stand-ins for the three external collaborators, good enough to
//! exercise every path of the lifecycle without a node, a verifier or an
//! indexer running somewhere:
//!
//! - [`InMemoryVerifier`] — PIN (salted hash), OTP and single-use recovery codes.
//! - [`InMemoryLedger`] — scripted per step label: confirm, revert after
//!   accept, reject at submission, or lose the status feed.
//! - [`InMemoryIndex`] — ingests confirmed hashes after a configurable lag.
//!
//! The verifier and ledger share a [`ChallengeRegistry`] so challenge
//! responses are actually checked and replays across operations fail.
//!
//! All timing uses `tokio::time`, so tests running on a paused clock are
//! fully deterministic.

mod index;
mod ledger;
mod registry;
mod verifier;

use std::sync::Arc;
use std::time::Duration;

pub use index::InMemoryIndex;
pub use ledger::{InMemoryLedger, ScriptedOutcome, StepScript, DEFAULT_CONFIRMATION_DELAY};
pub use registry::ChallengeRegistry;
pub use verifier::InMemoryVerifier;

use crate::config::LifecycleConfig;
use crate::lifecycle::LifecycleCoordinator;

/// Knobs for a [`Devnet`].
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    /// PIN registered with the verifier, if any.
    pub pin: Option<String>,
    /// Accepted one-time codes.
    pub otp_codes: Vec<String>,
    /// Recovery codes; each works once.
    pub recovery_codes: Vec<String>,
    /// Time from submission to final status for unscripted steps.
    pub confirmation_delay: Duration,
    /// Time between ledger confirmation and index visibility.
    pub index_lag: Duration,
    /// Whether the ledger insists on a valid challenge response.
    pub require_challenge: bool,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            pin: Some("123456".to_string()),
            otp_codes: Vec::new(),
            recovery_codes: Vec::new(),
            confirmation_delay: DEFAULT_CONFIRMATION_DELAY,
            index_lag: Duration::from_millis(400),
            require_challenge: true,
        }
    }
}

/// The three simulated collaborators, wired together.
#[derive(Clone)]
pub struct Devnet {
    /// Challenges issued by the verifier and checked by the ledger.
    pub registry: Arc<ChallengeRegistry>,
    /// Verification service.
    pub verifier: Arc<InMemoryVerifier>,
    /// Ledger RPC.
    pub ledger: Arc<InMemoryLedger>,
    /// Read model.
    pub index: Arc<InMemoryIndex>,
}

impl Devnet {
    /// Build a devnet from `config`.
    pub fn new(config: DevnetConfig) -> Self {
        let registry = Arc::new(ChallengeRegistry::new());

        let mut verifier = InMemoryVerifier::new(Arc::clone(&registry))
            .with_otp_codes(config.otp_codes)
            .with_recovery_codes(config.recovery_codes);
        if let Some(pin) = &config.pin {
            verifier = verifier.with_pin(pin);
        }

        let index = Arc::new(InMemoryIndex::new().with_lag(config.index_lag));

        let mut ledger = InMemoryLedger::new()
            .with_default_script(StepScript::default().with_delay(config.confirmation_delay))
            .with_index(Arc::clone(&index));
        if config.require_challenge {
            ledger = ledger.with_challenges(Arc::clone(&registry));
        }

        Self {
            registry,
            verifier: Arc::new(verifier),
            ledger: Arc::new(ledger),
            index,
        }
    }

    /// A coordinator talking to this devnet.
    pub fn coordinator(&self, config: LifecycleConfig) -> LifecycleCoordinator {
        LifecycleCoordinator::new(
            self.verifier.clone(),
            self.ledger.clone(),
            self.index.clone(),
            config,
        )
    }
}
