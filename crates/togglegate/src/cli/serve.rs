//! `serve` command
//!
//! Runs the gateway until Ctrl+C or SIGTERM, then drains connections and
//! shuts every tenant down.

use clap::Args;
use tracing::{info, warn};

use super::error::{CliError, CliResult};
use crate::config::GatewayConfig;
use crate::gateway::Gateway;

/// Run the gateway
///
/// Flags override the configuration file and the environment.
///
/// # Examples
///
///   togglegate serve --config togglegate.toml
///
///   TOGGLEGATE_CLIENT_KEYS=proxy-secret \
///   togglegate serve --upstream-url https://flags.example.com/api --bind 0.0.0.0:3000
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Listen address
    ///
    /// WARNING: Binding to 0.0.0.0 exposes the gateway on all interfaces.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Base URL of the flag backend API
    #[arg(long, value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Serve /proxy/all
    #[arg(long)]
    pub enable_all_endpoint: bool,
}

impl ServeCommand {
    /// Apply command-line overrides to a loaded configuration
    pub fn apply(&self, mut config: GatewayConfig) -> GatewayConfig {
        if let Some(bind) = &self.bind {
            config.bind_address.clone_from(bind);
        }
        if let Some(url) = &self.upstream_url {
            config.upstream.url.clone_from(url);
        }
        if self.enable_all_endpoint {
            config.enable_all_endpoint = true;
        }
        config
    }

    /// Execute the serve command
    ///
    /// # Errors
    ///
    /// Returns `CliError` if the configuration is invalid, the address cannot
    /// be bound or the server fails.
    pub async fn execute(self, config: GatewayConfig) -> CliResult<()> {
        let config = self.apply(config);
        config.validate()?;

        info!(
            bind = %config.bind_address,
            upstream = %config.upstream.url,
            instance_id = %config.upstream.instance_id,
            "Starting togglegate"
        );

        let gateway = Gateway::builder(config.clone()).build()?;
        let listener = tokio::net::TcpListener::bind(&config.bind_address)
            .await
            .map_err(|source| CliError::Bind {
                address: config.bind_address.clone(),
                source,
            })?;

        gateway.start();
        info!("Listening on {}", config.bind_address);

        let drain = gateway.clone();
        let served = axum::serve(listener, gateway.router())
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                drain.begin_drain();
            })
            .await;

        gateway.shutdown().await;
        served.map_err(CliError::Server)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl+C received, initiating shutdown"),
        () = terminate => info!("SIGTERM received, initiating shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let command = ServeCommand {
            bind: Some("0.0.0.0:4100".to_string()),
            upstream_url: Some("http://flags.internal/api".to_string()),
            enable_all_endpoint: true,
        };
        let config = command.apply(
            GatewayConfig::builder()
                .upstream_url("http://localhost:4242/api")
                .build(),
        );
        assert_eq!(config.bind_address, "0.0.0.0:4100");
        assert_eq!(config.upstream.url, "http://flags.internal/api");
        assert!(config.enable_all_endpoint);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let command = ServeCommand {
            bind: None,
            upstream_url: None,
            enable_all_endpoint: false,
        };
        let config = command.apply(GatewayConfig::builder().enable_all_endpoint(true).build());
        assert_eq!(config.bind_address, "127.0.0.1:3000");
        assert!(config.enable_all_endpoint);
    }
}
