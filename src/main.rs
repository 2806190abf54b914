//! docsink daemon entry point.
//!
//! Wires configuration, logging, and the capability implementations into a
//! single [`SyncEngine`] and runs it until a shutdown signal arrives.

use std::sync::Arc;

use core_runtime::{init_logging, DaemonConfig, LoggingConfig};
use core_state::{FailureLog, StateStore};
use core_sync::{EngineConfig, ExternalPreprocessor, SyncEngine};
use provider_ingest::IngestHttpClient;
use provider_localdir::LocalDirSource;
use sync_traits::{FileSource, IdentityPreprocessor, Preprocessor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("docsink: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::from_env()?;
    init_logging(LoggingConfig::default())?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting docsink");

    // The protocol was validated at config build time; `local` is the only
    // transport shipped in this binary.
    let source: Arc<dyn FileSource> = Arc::new(LocalDirSource::new(
        config.source.directory.clone(),
        config.allowed_extensions.clone(),
    ));

    let backend = Arc::new(IngestHttpClient::new(
        config.backend.url.clone(),
        config.backend.api_key.clone(),
    ));

    let preprocessor: Arc<dyn Preprocessor> = if config.preprocessor.enabled {
        let command = config
            .preprocessor
            .command
            .as_deref()
            .unwrap_or_default();
        Arc::new(ExternalPreprocessor::from_command_line(
            command,
            config.preprocessor.timeout,
        ))
    } else {
        Arc::new(IdentityPreprocessor)
    };

    let store = Arc::new(StateStore::new(config.state_file_path.clone()));
    let failures = Arc::new(FailureLog::new(
        config.failure_log_path.clone(),
        config.failure_log_max_size_kb * 1024,
    ));

    let engine = SyncEngine::new(
        source,
        backend,
        preprocessor,
        store,
        failures,
        EngineConfig {
            poll_interval: config.poll_interval,
            startup_sync: config.startup_sync.parse()?,
            cleanup_failed_docs: config.cleanup_failed_docs,
        },
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        });
    }

    engine.run(shutdown).await;
    Ok(())
}
