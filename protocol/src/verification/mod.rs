//! # Verification — Challenge-Response Handshake
//!
//! Before the ledger accepts a state change, the signer has to prove they are
//! who they claim to be. This module turns a user-supplied secret into a
//! [`ChallengeResponse`] the ledger submission call can carry.
//!
//! ```text
//!   VerificationRequest ──► format check ──► VerificationService::verify ──► ChallengeResponse
//!        (PIN/OTP/code)      (local, free)      (exactly one call)            (single use)
//! ```
//!
//! Malformed secrets fail with [`VerificationError::InvalidSecret`] before
//! anything touches the network. Rejections from the service are
//! authoritative and are never retried.
//!
//! For PIN challenges the service and ledger agree on a salted double-hash
//! (see [`challenge`]) so the plaintext PIN never has to be stored anywhere.

pub mod challenge;
pub mod responder;

mod error;

pub use error::{VerificationError, VerificationServiceError};
pub use responder::{
    ChallengeResponder, ChallengeResponse, VerificationContext, VerificationKind,
    VerificationRequest, VerificationService,
};
