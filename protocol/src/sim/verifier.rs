//! Simulated verification service.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::verification::challenge::{hash_pin, pin_response, random_secret};
use crate::verification::{
    ChallengeResponse, VerificationContext, VerificationKind, VerificationService,
    VerificationServiceError,
};

use super::registry::ChallengeRegistry;

struct StoredPin {
    salt: String,
    hashed: String,
}

/// In-memory verification service.
///
/// Stores only the salted hash of the PIN. Recovery codes are burned on
/// first successful use.
pub struct InMemoryVerifier {
    registry: Arc<ChallengeRegistry>,
    pin: Option<StoredPin>,
    otp_codes: HashSet<String>,
    recovery_codes: Mutex<HashSet<String>>,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryVerifier {
    /// A verifier with no secrets registered.
    pub fn new(registry: Arc<ChallengeRegistry>) -> Self {
        Self {
            registry,
            pin: None,
            otp_codes: HashSet::new(),
            recovery_codes: Mutex::new(HashSet::new()),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Register a PIN.
    pub fn with_pin(mut self, pin: &str) -> Self {
        let salt = random_secret();
        let hashed = hash_pin(&salt, pin);
        self.pin = Some(StoredPin { salt, hashed });
        self
    }

    /// Register accepted one-time codes.
    pub fn with_otp_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.otp_codes.extend(codes.into_iter().map(Into::into));
        self
    }

    /// Register recovery codes, in normalized form (lowercase, no separators).
    pub fn with_recovery_codes<I, S>(self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recovery_codes
            .lock()
            .extend(codes.into_iter().map(Into::into));
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// How many times `verify` was called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn expected_response(
        &self,
        secret: &str,
        kind: VerificationKind,
    ) -> Result<String, VerificationServiceError> {
        match kind {
            VerificationKind::Pin => {
                let stored = self.pin.as_ref().ok_or_else(|| {
                    VerificationServiceError::Rejected("no PIN configured".to_string())
                })?;
                if hash_pin(&stored.salt, secret) != stored.hashed {
                    return Err(VerificationServiceError::Rejected("incorrect PIN".to_string()));
                }
                Ok(pin_response(&stored.hashed, &random_secret()))
            }
            VerificationKind::Otp => {
                if !self.otp_codes.contains(secret) {
                    return Err(VerificationServiceError::Rejected("incorrect code".to_string()));
                }
                Ok(secret.to_string())
            }
            VerificationKind::RecoveryCode => {
                if !self.recovery_codes.lock().remove(secret) {
                    return Err(VerificationServiceError::Rejected(
                        "unknown or already used recovery code".to_string(),
                    ));
                }
                Ok(secret.to_string())
            }
        }
    }
}

#[async_trait]
impl VerificationService for InMemoryVerifier {
    async fn verify(
        &self,
        secret: &str,
        kind: VerificationKind,
        context: &VerificationContext,
    ) -> Result<ChallengeResponse, VerificationServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(VerificationServiceError::Unavailable(
                "verifier offline".to_string(),
            ));
        }

        let response = self.expected_response(secret, kind)?;
        let challenge_id = format!("chl-{}", Uuid::new_v4());
        self.registry.issue(challenge_id.clone(), response.clone());
        debug!(operation_id = %context.operation_id, %challenge_id, "challenge issued");
        Ok(ChallengeResponse::new(challenge_id, response))
    }
}
