//! Logging initialization

use tracing_subscriber::{
    Registry, filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::LoggingConfig;

/// Errors raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `config.level`. JSON output adds file and line
/// information; the human format stays compact.
///
/// # Errors
///
/// Returns `TelemetryError` if the level directive is invalid or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| TelemetryError::InvalidLevel(e.to_string()))?;
    install(env_filter, config.json)
}

/// Install the subscriber with an explicit level, ignoring `RUST_LOG`
///
/// Used when the command line forces verbosity.
///
/// # Errors
///
/// See [`init_tracing`].
pub fn init_tracing_with_level(level: &str, json: bool) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_new(level).map_err(|e| TelemetryError::InvalidLevel(e.to_string()))?;
    install(env_filter, json)
}

fn install(env_filter: EnvFilter, json: bool) -> Result<(), TelemetryError> {
    if json {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .json();

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .compact();

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))
    }
}
