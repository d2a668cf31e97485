//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init`] once at startup.

use crate::config::LoggingConfig;
use crate::error::{DaqError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the env filter: `RUST_LOG` wins, then the configured directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            DaqError::Config(format!("Invalid log filter {:?}: {}", config.filter, e))
        }),
    }
}

/// Install the global subscriber.
///
/// When `config.directory` is set, a daily rolling file layer is added and the
/// returned guard must be held for the lifetime of the program so buffered
/// lines are flushed. Fails with [`DaqError::Config`] if a global subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(config.ansi)
        .with_thread_ids(config.thread_ids);

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                DaqError::Config(format!("Failed to create log directory {:?}: {}", dir, e))
            })?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_thread_ids(config.thread_ids);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| DaqError::Config(format!("Logging already initialized: {}", e)))?;

    tracing::debug!("Logging initialized");
    Ok(guard)
}
