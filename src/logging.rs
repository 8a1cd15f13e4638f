//! Logging setup.
//!
//! Console output is always on. `RUST_LOG` takes precedence over the filter
//! from the configuration. When a log directory is configured, a daily
//! rolling file is written as well through a non-blocking writer; keep the
//! returned guard alive until shutdown so buffered lines get flushed.

use crate::config::{LoggingSettings, DEFAULT_LOG_FILTER};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    })
}

/// Install the global subscriber. Calling it again is harmless; the first
/// subscriber stays in place.
pub fn init(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let mut guard = None;
    let file_layer = settings.directory.as_ref().and_then(|directory| {
        if let Err(e) = std::fs::create_dir_all(directory) {
            eprintln!("Cannot create log directory {:?}: {}", directory, e);
            return None;
        }
        let appender = tracing_appender::rolling::daily(directory, &settings.file_prefix);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
    });

    let result = tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();
    match result {
        Ok(()) => {
            if let Some(directory) = &settings.directory {
                tracing::info!("Logging to {:?}", directory);
            }
        }
        Err(e) => tracing::debug!("Logging already initialised: {}", e),
    }
    guard
}
