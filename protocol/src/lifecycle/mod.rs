//! # Lifecycle
//!
//! The single entry point the surrounding application calls:
//! [`LifecycleCoordinator::run_lifecycle`]. Everything else in the crate
//! exists to serve it.
//!
//! Every run ends with exactly one of:
//!
//! | Terminal event     | Ledger write                     |
//! |--------------------|----------------------------------|
//! | `Success`          | confirmed and queryable          |
//! | `PartiallyIndexed` | confirmed, index behind          |
//! | `Failed`           | absent or reverted               |
//! | `Cancelled`        | see [`LedgerWriteState`]         |

mod batch;
mod coordinator;
mod error;
mod event;

pub use batch::{ConfirmedBatch, TransactionBatch};
pub use coordinator::{LifecycleCoordinator, LifecycleStream};
pub use error::LifecycleError;
pub use event::{LedgerWriteState, LifecycleEvent, LifecycleStage};
