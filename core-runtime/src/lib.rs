//! # Daemon Runtime
//!
//! Process-level concerns of the docsink daemon:
//!
//! - **Configuration** (`config`): builder-validated daemon options, loaded
//!   from `DOCSINK_*` environment variables with spec'd defaults
//! - **Logging** (`logging`): `tracing-subscriber` bootstrap with env-filter
//!   support and selectable output formats

pub mod config;
pub mod error;
pub mod logging;

pub use config::{BackendOptions, DaemonConfig, PreprocessorOptions, SourceOptions};
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat, LoggingConfig};
