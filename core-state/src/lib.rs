//! # Synchronization State
//!
//! Durable bookkeeping for the synchronization engine:
//!
//! - **State Store** (`store`): the persisted ledger mapping source files to
//!   their content hash, last-modified timestamp, and backend document id,
//!   plus the queue of deletes deferred by a busy backend. Saved as a single
//!   atomically-renamed JSON snapshot.
//! - **Failure Log** (`failure_log`): append-only, rotated, line-delimited
//!   record of terminal upload failures, with the dedup queries the engine
//!   uses for idempotent failure reporting and re-upload suppression.

pub mod error;
pub mod failure_log;
pub mod store;

pub use error::{Result, StateError};
pub use failure_log::FailureLog;
pub use store::{FileState, PendingDelete, PendingUpload, StateStore};
