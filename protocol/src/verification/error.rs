//! Error types for the verification handshake.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::responder::VerificationKind;

/// What the external verification service can say besides "yes".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationServiceError {
    /// The secret was well-formed but wrong (or already used, for recovery codes).
    #[error("verification rejected: {0}")]
    Rejected(String),

    /// The service could not be reached or answered with garbage.
    #[error("verification service unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the [`ChallengeResponder`](super::ChallengeResponder).
///
/// Both variants are terminal for the lifecycle that produced them.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum VerificationError {
    /// The secret is malformed for its kind, or the service rejected it.
    #[error("invalid {kind} secret: {reason}")]
    InvalidSecret {
        /// Kind of secret that was presented.
        kind: VerificationKind,
        /// Why it was refused.
        reason: String,
    },

    /// The verification service could not produce an answer.
    #[error("verification service unavailable: {reason}")]
    VerificationServiceUnavailable {
        /// Transport- or service-level detail.
        reason: String,
    },
}
