//! User-friendly error formatting for the CLI

use colored::Colorize;
use togglegate_core::GatewayError;

use crate::config::ConfigError;
use crate::telemetry::TelemetryError;

pub type CliResult<T> = Result<T, CliError>;

/// Errors a command can end with
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Format an error for terminal display
#[must_use]
pub fn format_error(error: &CliError) -> String {
    let (title, suggestion) = match error {
        CliError::Config(ConfigError::FileNotFound(_)) => (
            "Configuration file not found",
            "Check the --config path, or omit it to use TOGGLEGATE_* environment variables",
        ),
        CliError::Config(ConfigError::Invalid { .. }) => (
            "Invalid configuration",
            "Run `togglegate check-config` to see the effective settings",
        ),
        CliError::Config(_) => (
            "Configuration error",
            "Check the file syntax and the TOGGLEGATE_* environment variables",
        ),
        CliError::Gateway(GatewayError::Configuration { .. }) => (
            "Configuration error",
            "Run `togglegate check-config` to see the effective settings",
        ),
        CliError::Gateway(_) => (
            "Gateway error",
            "Check that the flag backend is reachable",
        ),
        CliError::Telemetry(_) => (
            "Logging setup failed",
            "Check RUST_LOG and logging.level for invalid directives",
        ),
        CliError::Bind { .. } => (
            "Cannot listen",
            "Check that the address is free and valid, or pass a different --bind",
        ),
        CliError::Server(_) => ("Server error", "See the log output above for details"),
    };

    format!(
        "{} {}\n  {}\n\n{}\n  {}",
        "✗".red().bold(),
        title,
        error,
        "Suggestion:".yellow(),
        suggestion
    )
}

/// Print an error to stderr and return the exit code
#[must_use]
pub fn display_error(error: &CliError) -> i32 {
    eprintln!("{}", format_error(error));
    match error {
        CliError::Config(_) | CliError::Gateway(GatewayError::Configuration { .. }) => 2,
        _ => 1,
    }
}
