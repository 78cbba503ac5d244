//! `check-config` command

use clap::Args;
use colored::Colorize;

use super::error::CliResult;
use crate::config::GatewayConfig;

/// Load and validate configuration, then print it with secrets redacted
#[derive(Debug, Args)]
pub struct CheckConfigCommand {
    /// Print the full configuration instead of a summary
    #[arg(long)]
    pub full: bool,
}

impl CheckConfigCommand {
    /// Execute the command
    ///
    /// # Errors
    ///
    /// Returns `CliError::Config` if validation fails.
    pub fn execute(self, config: GatewayConfig) -> CliResult<()> {
        config.validate()?;

        println!("{} Configuration is valid\n", "✓".green().bold());
        if self.full {
            println!("{config:#?}");
        } else {
            println!("{}", summary(&config));
        }
        Ok(())
    }
}

fn summary(config: &GatewayConfig) -> String {
    let rows = [
        ("bind address", config.bind_address.clone()),
        ("upstream", config.upstream.url.clone()),
        ("instance id", config.upstream.instance_id.clone()),
        (
            "environment",
            config
                .upstream
                .environment
                .clone()
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            "api token",
            if config.upstream.api_token.is_some() {
                "<redacted>".to_string()
            } else {
                "not set".to_string()
            },
        ),
        ("client keys", config.client_keys.len().to_string()),
        (
            "server-side tokens",
            config.server_side_tokens.len().to_string(),
        ),
        ("key header", config.client_keys_header_name.clone()),
        ("/proxy/all", config.enable_all_endpoint.to_string()),
        (
            "refresh interval",
            format!("{}ms", config.refresh_interval_ms),
        ),
        (
            "metrics",
            if config.disable_metrics {
                "disabled".to_string()
            } else {
                format!("every {}ms", config.metrics_interval_ms)
            },
        ),
        ("tenant ttl", format!("{}ms", config.tenant_ttl_ms)),
        (
            "sweep interval",
            format!("{}ms", config.sweep_interval().as_millis()),
        ),
    ];

    rows.iter()
        .map(|(label, value)| format!("  {:<20} {}", label.bold(), value))
        .collect::<Vec<_>>()
        .join("\n")
}
