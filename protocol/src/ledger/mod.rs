//! # Ledger — Submission and Confirmation Tracking
//!
//! The ledger is an external collaborator: it acknowledges a submission with
//! a transaction hash and later reports, out of band, whether that
//! transaction made it. This module defines that contract ([`Ledger`]) and
//! the [`TransactionEmitter`], which turns a multi-step [`Operation`] into an
//! ordered stream of [`TransactionEvent`]s.
//!
//! ## Per-step event shape
//!
//! ```text
//! Pending(no hash) ─► Pending(hash) ─► Pending(hash, n confs)* ─► Confirmed | Failed
//!       │ submit rejected
//!       └──────────────────────────────────────────────────────► Failed(no hash)
//! ```
//!
//! Steps run strictly one after another. The first `Failed` ends the stream;
//! later steps are never submitted.

pub mod emitter;
pub mod event;
pub mod types;

pub use emitter::{TransactionEmitter, TransactionStream};
pub use event::{TransactionEvent, TransactionFailure};
pub use types::{
    Ledger, LedgerCall, LedgerError, LedgerStatus, Operation, StatusFeed, TransactionHash,
};
