//! # Synchronization Engine
//!
//! The core of the daemon: reconciles three authorities (the live source
//! listing, the persisted local state, and the backend's document set)
//! while tolerating a busy backend, asynchronous upload results, and
//! crash-restart.
//!
//! ## Components
//!
//! - **Engine** (`engine`): startup reconciliation, the periodic poll tick,
//!   and the pending-delete / pending-upload queues
//! - **External Preprocessor** (`preprocess`): child-process transform
//!   applied to downloads before upload
//! - **Errors** (`error`): the engine error taxonomy; `Busy` is the only
//!   retriable variant

pub mod engine;
pub mod error;
pub mod preprocess;

pub use engine::{EngineConfig, StartupSync, SyncEngine};
pub use error::{Result, SyncError};
pub use preprocess::ExternalPreprocessor;
