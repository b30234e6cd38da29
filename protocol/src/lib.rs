// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Lifecycle — Transaction Lifecycle Coordination
//!
//! Getting a transaction onto the ledger is the easy half. The hard half is
//! everything around it: proving the user is allowed to sign, following the
//! transaction from "accepted" to "final", and then waiting for the read
//! model to catch up so the next query doesn't lie to the user.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - **verification** — turns a PIN, one-time code or recovery code into a
//!   single-use challenge response. Malformed secrets never leave the process.
//! - **ledger** — the ledger collaborator and the `TransactionEmitter`, which
//!   drives one or more dependent submissions strictly in sequence and exposes
//!   their progress as an ordered stream.
//! - **indexing** — the read-model collaborator and the `IndexingWaiter`,
//!   which polls until every confirmed hash is queryable (or the deadline hits).
//! - **lifecycle** — the `LifecycleCoordinator`, composing the three into one
//!   stream that always ends with exactly one terminal event.
//! - **cancel** — cooperative cancellation shared by the whole pipeline.
//! - **sim** — in-memory collaborators for tests and the devnet gateway.
//! - **config** — constants and the tunable `LifecycleConfig`.
//!
//! ## Ground Rules
//!
//! 1. Nothing here retries. Failures are either authoritative (bad PIN,
//!    reverted transaction) or need a human decision.
//! 2. A slow indexer is not a failed transaction. It gets its own outcome.
//! 3. No background task outlives the stream that started it.

pub mod cancel;
pub mod config;
pub mod indexing;
pub mod ledger;
pub mod lifecycle;
pub mod sim;
pub mod verification;

pub use cancel::{cancellation, CancelHandle, Cancellation};
pub use config::LifecycleConfig;
pub use indexing::{IndexReader, IndexingError, IndexingWaiter};
pub use ledger::{
    Ledger, LedgerCall, Operation, TransactionEmitter, TransactionEvent, TransactionFailure,
    TransactionHash,
};
pub use lifecycle::{LifecycleCoordinator, LifecycleError, LifecycleEvent};
pub use verification::{
    ChallengeResponder, ChallengeResponse, VerificationError, VerificationKind,
    VerificationRequest, VerificationService,
};
