//! Command-line interface
//!
//! ```text
//! cli/
//! ├── serve.rs         # Run the gateway
//! ├── check_config.rs  # Load, validate and print configuration
//! └── error.rs         # User-facing error display
//! ```

pub mod check_config;
pub mod error;
pub mod serve;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::GatewayConfig;
use crate::telemetry;
use error::CliResult;

/// togglegate - multi-tenant feature-flag evaluation gateway
#[derive(Parser, Debug)]
#[command(
    name = "togglegate",
    version,
    about = "Multi-tenant feature-flag evaluation gateway",
    long_about = "Evaluates feature toggles for many client applications against cached\n\
                  snapshots, keeping one warm backend connection per application.",
    author
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway
    #[command(visible_alias = "s")]
    Serve(serve::ServeCommand),

    /// Load and validate configuration, then print it with secrets redacted
    CheckConfig(check_config::CheckConfigCommand),
}

impl Cli {
    /// Execute the selected command
    ///
    /// # Errors
    ///
    /// Returns `CliError` if configuration, logging setup or the command fails.
    pub async fn execute(self) -> CliResult<()> {
        if self.no_color || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }

        let config = GatewayConfig::load(self.config.as_deref())?;
        let level = self.level_override();

        match self.command {
            Command::Serve(cmd) => {
                init_logging(&config, level)?;
                cmd.execute(config).await
            }
            Command::CheckConfig(cmd) => {
                init_logging(&config, level.or(Some("warn")))?;
                cmd.execute(config)
            }
        }
    }

    /// Level forced by `-v`/`--quiet`, if any
    fn level_override(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

fn init_logging(config: &GatewayConfig, level: Option<&str>) -> CliResult<()> {
    match level {
        Some(level) => telemetry::init_tracing_with_level(level, config.logging.json)?,
        None => telemetry::init_tracing(&config.logging)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "togglegate",
            "serve",
            "--bind",
            "0.0.0.0:4000",
            "--upstream-url",
            "http://localhost:4242/api",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::try_parse_from(["togglegate", "-vvv", "check-config"]).unwrap();
        assert_eq!(cli.verbose, 3);
        assert_eq!(cli.level_override(), Some("trace"));

        let cli = Cli::try_parse_from(["togglegate", "check-config"]).unwrap();
        assert_eq!(cli.level_override(), None);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let cli = Cli::try_parse_from(["togglegate", "-v", "--quiet", "check-config"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["togglegate", "serve", "--config", "gateway.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("gateway.toml")));
    }
}
