//! # Daemon Configuration
//!
//! Builder-validated configuration for the docsink daemon.
//!
//! ## Overview
//!
//! All options carry the documented defaults; only the source directory and
//! the backend URL are required. Validation is fail-fast with actionable
//! messages, so a bad deployment dies at startup rather than mid-sync.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::DaemonConfig;
//!
//! let config = DaemonConfig::builder()
//!     .source_directory("/srv/inbox")
//!     .backend_url("http://localhost:9621")
//!     .build()
//!     .expect("invalid configuration");
//! assert_eq!(config.startup_sync, "none");
//! ```
//!
//! In production the binary loads everything from `DOCSINK_*` environment
//! variables via [`DaemonConfig::from_env`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const STARTUP_SYNC_MODES: [&str; 3] = ["none", "upload", "full"];

/// Remote source options.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Transport selector. This build ships `local`; network transports
    /// plug in behind the `FileSource` trait.
    pub protocol: String,
    /// Directory watched for documents.
    pub directory: PathBuf,
}

/// Ingest backend options.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Base URL of the backend's REST interface.
    pub url: String,
    /// Optional API key, sent as `X-API-Key`.
    pub api_key: Option<String>,
}

/// External preprocessor options.
#[derive(Debug, Clone)]
pub struct PreprocessorOptions {
    pub enabled: bool,
    /// Whitespace-separated command line, required when enabled.
    pub command: Option<String>,
    /// Hard per-file timeout.
    pub timeout: Duration,
}

impl Default for PreprocessorOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            command: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Validated daemon configuration. Construct via [`DaemonConfig::builder`]
/// or [`DaemonConfig::from_env`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Fixed delay between poll ticks.
    pub poll_interval: Duration,

    /// Startup reconciliation mode: `none`, `upload`, or `full`.
    pub startup_sync: String,

    /// Case-insensitive file suffixes to mirror, each with a leading dot.
    pub allowed_extensions: Vec<String>,

    /// Path of the persisted state snapshot.
    pub state_file_path: PathBuf,

    /// Base path of the failure log; archives rotate to `.1..=.5`.
    pub failure_log_path: PathBuf,

    /// Rotation threshold for the failure log.
    pub failure_log_max_size_kb: u64,

    /// Delete terminally-failed documents from the backend after recording
    /// them.
    pub cleanup_failed_docs: bool,

    pub preprocessor: PreprocessorOptions,
    pub source: SourceOptions,
    pub backend: BackendOptions,
}

impl DaemonConfig {
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    /// Loads the configuration from `DOCSINK_*` environment variables,
    /// falling back to the documented defaults.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Environment loading against an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

        let mut builder = Self::builder();
        if let Some(value) = get("DOCSINK_POLL_INTERVAL_MS") {
            builder = builder.poll_interval_ms(parse_u64("DOCSINK_POLL_INTERVAL_MS", &value)?);
        }
        if let Some(value) = get("DOCSINK_STARTUP_SYNC") {
            builder = builder.startup_sync(value);
        }
        if let Some(value) = get("DOCSINK_ALLOWED_EXTENSIONS") {
            builder = builder.allowed_extensions(
                value
                    .split(',')
                    .map(|ext| ext.trim().to_string())
                    .filter(|ext| !ext.is_empty())
                    .collect(),
            );
        }
        if let Some(value) = get("DOCSINK_STATE_FILE_PATH") {
            builder = builder.state_file_path(value);
        }
        if let Some(value) = get("DOCSINK_FAILURE_LOG_PATH") {
            builder = builder.failure_log_path(value);
        }
        if let Some(value) = get("DOCSINK_FAILURE_LOG_MAX_SIZE_KB") {
            builder = builder
                .failure_log_max_size_kb(parse_u64("DOCSINK_FAILURE_LOG_MAX_SIZE_KB", &value)?);
        }
        if let Some(value) = get("DOCSINK_CLEANUP_FAILED_DOCS") {
            builder =
                builder.cleanup_failed_docs(parse_bool("DOCSINK_CLEANUP_FAILED_DOCS", &value)?);
        }
        if let Some(value) = get("DOCSINK_PREPROCESSOR_ENABLED") {
            builder =
                builder.preprocessor_enabled(parse_bool("DOCSINK_PREPROCESSOR_ENABLED", &value)?);
        }
        if let Some(value) = get("DOCSINK_PREPROCESSOR_COMMAND") {
            builder = builder.preprocessor_command(value);
        }
        if let Some(value) = get("DOCSINK_PREPROCESSOR_TIMEOUT_SECONDS") {
            builder = builder.preprocessor_timeout_seconds(parse_u64(
                "DOCSINK_PREPROCESSOR_TIMEOUT_SECONDS",
                &value,
            )?);
        }
        if let Some(value) = get("DOCSINK_SOURCE_PROTOCOL") {
            builder = builder.source_protocol(value);
        }
        if let Some(value) = get("DOCSINK_SOURCE_DIRECTORY") {
            builder = builder.source_directory(value);
        }
        if let Some(value) = get("DOCSINK_BACKEND_URL") {
            builder = builder.backend_url(value);
        }
        if let Some(value) = get("DOCSINK_BACKEND_API_KEY") {
            builder = builder.backend_api_key(value);
        }
        builder.build()
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::Config(format!(
            "{key} must be 'true' or 'false', got '{value}'"
        ))),
    }
}

/// Builder for [`DaemonConfig`].
#[derive(Default)]
pub struct DaemonConfigBuilder {
    poll_interval_ms: Option<u64>,
    startup_sync: Option<String>,
    allowed_extensions: Option<Vec<String>>,
    state_file_path: Option<PathBuf>,
    failure_log_path: Option<PathBuf>,
    failure_log_max_size_kb: Option<u64>,
    cleanup_failed_docs: bool,
    preprocessor_enabled: bool,
    preprocessor_command: Option<String>,
    preprocessor_timeout_seconds: Option<u64>,
    source_protocol: Option<String>,
    source_directory: Option<PathBuf>,
    backend_url: Option<String>,
    backend_api_key: Option<String>,
}

impl DaemonConfigBuilder {
    pub fn poll_interval_ms(mut self, millis: u64) -> Self {
        self.poll_interval_ms = Some(millis);
        self
    }

    pub fn startup_sync(mut self, mode: impl Into<String>) -> Self {
        self.startup_sync = Some(mode.into());
        self
    }

    pub fn allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.allowed_extensions = Some(extensions);
        self
    }

    pub fn state_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file_path = Some(path.into());
        self
    }

    pub fn failure_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.failure_log_path = Some(path.into());
        self
    }

    pub fn failure_log_max_size_kb(mut self, size_kb: u64) -> Self {
        self.failure_log_max_size_kb = Some(size_kb);
        self
    }

    pub fn cleanup_failed_docs(mut self, enabled: bool) -> Self {
        self.cleanup_failed_docs = enabled;
        self
    }

    pub fn preprocessor_enabled(mut self, enabled: bool) -> Self {
        self.preprocessor_enabled = enabled;
        self
    }

    pub fn preprocessor_command(mut self, command: impl Into<String>) -> Self {
        self.preprocessor_command = Some(command.into());
        self
    }

    pub fn preprocessor_timeout_seconds(mut self, seconds: u64) -> Self {
        self.preprocessor_timeout_seconds = Some(seconds);
        self
    }

    pub fn source_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.source_protocol = Some(protocol.into());
        self
    }

    pub fn source_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.source_directory = Some(directory.into());
        self
    }

    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = Some(url.into());
        self
    }

    pub fn backend_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.backend_api_key = Some(api_key.into());
        self
    }

    /// Validates and assembles the configuration.
    pub fn build(self) -> Result<DaemonConfig> {
        let poll_interval_ms = self.poll_interval_ms.unwrap_or(60_000);
        if poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll interval must be greater than 0 ms".to_string(),
            ));
        }

        let startup_sync = self
            .startup_sync
            .unwrap_or_else(|| "none".to_string())
            .to_ascii_lowercase();
        if !STARTUP_SYNC_MODES.contains(&startup_sync.as_str()) {
            return Err(Error::Config(format!(
                "unknown startup-sync mode '{startup_sync}', expected one of: none, upload, full"
            )));
        }

        let allowed_extensions = self.allowed_extensions.unwrap_or_else(|| {
            vec![".pdf".to_string(), ".doc".to_string(), ".docx".to_string()]
        });
        if allowed_extensions.is_empty() {
            return Err(Error::Config(
                "at least one allowed extension is required".to_string(),
            ));
        }
        for ext in &allowed_extensions {
            if !ext.starts_with('.') {
                return Err(Error::Config(format!(
                    "allowed extension '{ext}' must start with a dot, e.g. '.pdf'"
                )));
            }
        }

        let failure_log_max_size_kb = self.failure_log_max_size_kb.unwrap_or(1024);
        if failure_log_max_size_kb == 0 {
            return Err(Error::Config(
                "failure log max size must be greater than 0 KB".to_string(),
            ));
        }

        if self.preprocessor_enabled
            && self
                .preprocessor_command
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(Error::Config(
                "preprocessor is enabled but no command is configured. \
                 Set DOCSINK_PREPROCESSOR_COMMAND or disable the preprocessor."
                    .to_string(),
            ));
        }

        let source_protocol = self
            .source_protocol
            .unwrap_or_else(|| "local".to_string())
            .to_ascii_lowercase();
        if source_protocol != "local" {
            return Err(Error::Config(format!(
                "unsupported source protocol '{source_protocol}'. This build ships 'local'; \
                 other transports plug in behind the FileSource trait."
            )));
        }

        let source_directory = self.source_directory.ok_or_else(|| {
            Error::Config(
                "source directory is required. Set DOCSINK_SOURCE_DIRECTORY or use \
                 .source_directory()."
                    .to_string(),
            )
        })?;

        let backend_url = self.backend_url.ok_or_else(|| {
            Error::Config(
                "backend URL is required. Set DOCSINK_BACKEND_URL or use .backend_url().".to_string(),
            )
        })?;
        if backend_url.trim().is_empty() {
            return Err(Error::Config("backend URL cannot be empty".to_string()));
        }

        Ok(DaemonConfig {
            poll_interval: Duration::from_millis(poll_interval_ms),
            startup_sync,
            allowed_extensions,
            state_file_path: self
                .state_file_path
                .unwrap_or_else(|| PathBuf::from("data/state.json")),
            failure_log_path: self
                .failure_log_path
                .unwrap_or_else(|| PathBuf::from("logs/failures.log")),
            failure_log_max_size_kb,
            cleanup_failed_docs: self.cleanup_failed_docs,
            preprocessor: PreprocessorOptions {
                enabled: self.preprocessor_enabled,
                command: self.preprocessor_command,
                timeout: Duration::from_secs(self.preprocessor_timeout_seconds.unwrap_or(120)),
            },
            source: SourceOptions {
                protocol: source_protocol,
                directory: source_directory,
            },
            backend: BackendOptions {
                url: backend_url,
                api_key: self.backend_api_key,
            },
        })
    }
}
