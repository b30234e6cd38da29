//! The [`ChallengeResponder`] and the vocabulary it speaks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config;

use super::error::{VerificationError, VerificationServiceError};

// ---------------------------------------------------------------------------
// Verification Kind
// ---------------------------------------------------------------------------

/// Which kind of secret the user presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    /// Six-digit PIN.
    Pin,
    /// Six-digit time-based one-time code.
    Otp,
    /// One of the printed recovery codes. Single use.
    RecoveryCode,
}

impl fmt::Display for VerificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin => write!(f, "PIN"),
            Self::Otp => write!(f, "OTP"),
            Self::RecoveryCode => write!(f, "recovery code"),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A secret the user typed, tagged with its kind.
///
/// Lives for one lifecycle and is wiped from memory on drop. The `Debug`
/// impl never prints the secret.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct VerificationRequest {
    secret: String,
    #[zeroize(skip)]
    kind: VerificationKind,
}

impl VerificationRequest {
    /// Wrap a secret of the given kind.
    pub fn new(secret: impl Into<String>, kind: VerificationKind) -> Self {
        Self {
            secret: secret.into(),
            kind,
        }
    }

    /// Shorthand for a PIN request.
    pub fn pin(secret: impl Into<String>) -> Self {
        Self::new(secret, VerificationKind::Pin)
    }

    /// The kind of secret carried.
    pub fn kind(&self) -> VerificationKind {
        self.kind
    }
}

impl fmt::Debug for VerificationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationRequest")
            .field("secret", &"<redacted>")
            .field("kind", &self.kind)
            .finish()
    }
}

/// Proof of authorization for exactly one operation.
///
/// Deliberately not `Clone`: it is handed by value to the emitter and
/// consumed there. Presenting the same challenge for a second operation is a
/// programming error, and ledgers that track challenges reject it.
#[derive(PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChallengeResponse {
    challenge_id: String,
    response: String,
}

impl ChallengeResponse {
    /// Build a response from its parts (normally done by a verification service).
    pub fn new(challenge_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            response: response.into(),
        }
    }

    /// The empty response, for ledgers that require no pre-challenge.
    pub fn none() -> Self {
        Self::new(String::new(), String::new())
    }

    /// Identifier of the challenge this answers.
    pub fn challenge_id(&self) -> &str {
        &self.challenge_id
    }

    /// The response value.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// `true` for [`ChallengeResponse::none`].
    pub fn is_empty(&self) -> bool {
        self.challenge_id.is_empty() && self.response.is_empty()
    }
}

impl fmt::Debug for ChallengeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResponse")
            .field("challenge_id", &self.challenge_id)
            .field("response", &"<redacted>")
            .finish()
    }
}

/// What the verification service learns about the operation being authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationContext {
    /// Lifecycle invocation this challenge belongs to.
    pub operation_id: Uuid,
    /// Operation kind, e.g. `"transfer"`.
    pub operation_kind: String,
}

// ---------------------------------------------------------------------------
// External Service
// ---------------------------------------------------------------------------

/// The external verification service.
///
/// Receives a secret that has already passed local format checks, in
/// normalized form (trimmed, recovery-code separators removed).
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Verify the secret and issue a challenge response for `context`.
    async fn verify(
        &self,
        secret: &str,
        kind: VerificationKind,
        context: &VerificationContext,
    ) -> Result<ChallengeResponse, VerificationServiceError>;
}

// ---------------------------------------------------------------------------
// ChallengeResponder
// ---------------------------------------------------------------------------

/// Turns a [`VerificationRequest`] into a [`ChallengeResponse`].
///
/// Stateless apart from the service handle; cheap to clone.
#[derive(Clone)]
pub struct ChallengeResponder {
    service: Arc<dyn VerificationService>,
}

impl ChallengeResponder {
    /// Create a responder backed by `service`.
    pub fn new(service: Arc<dyn VerificationService>) -> Self {
        Self { service }
    }

    /// Validate the secret locally, then make exactly one call to the
    /// verification service. The request is consumed and wiped either way.
    pub async fn respond(
        &self,
        request: VerificationRequest,
        context: &VerificationContext,
    ) -> Result<ChallengeResponse, VerificationError> {
        let kind = request.kind();
        let secret = normalize_secret(&request.secret, kind).map_err(|reason| {
            debug!(operation_id = %context.operation_id, %kind, %reason, "secret failed format check");
            VerificationError::InvalidSecret { kind, reason }
        })?;
        drop(request);

        debug!(operation_id = %context.operation_id, %kind, "requesting challenge response");
        match self.service.verify(&secret, kind, context).await {
            Ok(response) => Ok(response),
            Err(VerificationServiceError::Rejected(reason)) => {
                warn!(operation_id = %context.operation_id, %kind, "verification rejected");
                Err(VerificationError::InvalidSecret { kind, reason })
            }
            Err(VerificationServiceError::Unavailable(reason)) => {
                warn!(operation_id = %context.operation_id, %reason, "verification service unavailable");
                Err(VerificationError::VerificationServiceUnavailable { reason })
            }
        }
    }
}

/// Check a secret against the format its kind requires and return the
/// normalized form handed to the service.
pub fn normalize_secret(
    secret: &str,
    kind: VerificationKind,
) -> Result<Zeroizing<String>, String> {
    let trimmed = secret.trim();
    match kind {
        VerificationKind::Pin => digits_exactly(trimmed, config::PIN_LENGTH),
        VerificationKind::Otp => digits_exactly(trimmed, config::OTP_LENGTH),
        VerificationKind::RecoveryCode => {
            let code: Zeroizing<String> = Zeroizing::new(
                trimmed
                    .chars()
                    .filter(|c| *c != config::RECOVERY_CODE_SEPARATOR)
                    .collect(),
            );
            if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err("recovery code must be alphanumeric".to_string());
            }
            let len = code.len();
            if !(config::RECOVERY_CODE_MIN_LENGTH..=config::RECOVERY_CODE_MAX_LENGTH).contains(&len)
            {
                return Err(format!(
                    "recovery code must be {}-{} characters, got {}",
                    config::RECOVERY_CODE_MIN_LENGTH,
                    config::RECOVERY_CODE_MAX_LENGTH,
                    len
                ));
            }
            Ok(Zeroizing::new(code.to_ascii_lowercase()))
        }
    }
}

fn digits_exactly(secret: &str, len: usize) -> Result<Zeroizing<String>, String> {
    if secret.len() != len || !secret.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("expected exactly {} digits", len));
    }
    Ok(Zeroizing::new(secret.to_string()))
}
