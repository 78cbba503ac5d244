//! Gateway front: authentication, request shaping, tenant dispatch
//!
//! A [`Gateway`] owns the tenant pool, the key store and the enrichment
//! pipeline. Its [`router`](Gateway::router) is a plain axum `Router` that can
//! be served directly or nested into a larger application.
//!
//! ```rust,no_run
//! use togglegate::{Gateway, GatewayConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::builder()
//!     .upstream_url("https://flags.example.com/api")
//!     .api_token("default:production.abc")
//!     .client_key("proxy-secret")
//!     .build();
//!
//! let gateway = Gateway::builder(config).build()?;
//! gateway.start();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, gateway.router()).await?;
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod counters;
pub mod error;
mod handlers;
pub mod request;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use http::HeaderMap;
use togglegate_core::{
    ContextEnricher, DefaultPropertiesEnricher, EnrichmentPipeline, FlagBackend, GatewayError,
    GatewayResult, PoolStats, StrategyEvaluator, TenantPool, ToggleEvaluator,
};
use tracing::info;

use crate::backend::HttpBackend;
use crate::config::GatewayConfig;
use auth::{Access, Caller, KeyStore};
use counters::{CountersSnapshot, GatewayCounters};

pub use auth::extract_token;
pub use error::ApiError;

/// State shared by every request handler
#[derive(Debug)]
pub(crate) struct GatewayState {
    pool: Arc<TenantPool>,
    keys: KeyStore,
    client_keys_header: String,
    enrichment: EnrichmentPipeline,
    enable_all_endpoint: bool,
    counters: GatewayCounters,
    ready: AtomicBool,
}

impl GatewayState {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn authorize(&self, headers: &HeaderMap, access: Access) -> GatewayResult<Caller> {
        self.keys
            .authorize(headers, &self.client_keys_header, access)
            .inspect_err(|_| self.counters.inc_unauthorized())
    }

    fn ensure_all_endpoint(&self) -> GatewayResult<()> {
        if self.enable_all_endpoint {
            Ok(())
        } else {
            Err(GatewayError::feature_disabled("/proxy/all"))
        }
    }
}

/// The feature-flag evaluation gateway
#[derive(Debug, Clone)]
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Start building a gateway from configuration
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Start the eviction sweep and accept traffic
    pub fn start(&self) {
        self.state.pool.start_sweeper();
        self.state.ready.store(true, Ordering::Release);
        info!(
            client_keys = self.state.keys.client_key_count(),
            all_endpoint = self.state.enable_all_endpoint,
            enrichers = self.state.enrichment.len(),
            "Gateway ready to receive traffic"
        );
    }

    /// Answer every request with 503 from now on
    ///
    /// Called when a shutdown signal arrives, before in-flight connections drain.
    pub fn begin_drain(&self) {
        if self.state.ready.swap(false, Ordering::AcqRel) {
            info!("Draining connections");
        }
    }

    /// Stop accepting traffic and shut every tenant down
    ///
    /// Tenants stop their loops and attempt a final metrics flush.
    pub async fn shutdown(&self) {
        self.state.ready.store(false, Ordering::Release);
        self.state.pool.shutdown().await;
        info!("Gateway stopped");
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// HTTP routes of the gateway
    pub fn router(&self) -> Router {
        handlers::router(Arc::clone(&self.state))
    }

    /// Replace the accepted client keys without restarting
    pub fn set_client_keys<S: AsRef<str>>(&self, keys: &[S]) {
        self.state.keys.set_client_keys(keys);
        info!(count = self.state.keys.client_key_count(), "Client keys replaced");
    }

    /// The tenant pool behind this gateway
    pub fn pool(&self) -> &Arc<TenantPool> {
        &self.state.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.state.pool.stats()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.state.counters.snapshot(self.state.pool.stats())
    }
}

/// Builder for [`Gateway`]
///
/// Without an explicit backend the HTTP backend is created from
/// `config.upstream`. Without an explicit evaluator [`StrategyEvaluator`] is used.
#[derive(Debug)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    backend: Option<Arc<dyn FlagBackend>>,
    evaluator: Option<Arc<dyn ToggleEvaluator>>,
    enrichers: Vec<Arc<dyn ContextEnricher>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            backend: None,
            evaluator: None,
            enrichers: Vec::new(),
        }
    }

    /// Use a custom flag backend
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn FlagBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a custom toggle evaluator
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn ToggleEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Append a context enricher; enrichers run in the order added
    #[must_use]
    pub fn enricher(mut self, enricher: Arc<dyn ContextEnricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    /// Validate the configuration and assemble the gateway
    ///
    /// The gateway does not accept traffic until [`Gateway::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` for invalid configuration or if the
    /// HTTP backend cannot be created.
    pub fn build(self) -> GatewayResult<Gateway> {
        self.config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::from_upstream(&self.config.upstream)?),
        };
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(StrategyEvaluator::new()));

        let mut enrichment = EnrichmentPipeline::new();
        if !self.config.context.default_properties.is_empty() {
            enrichment.push(Arc::new(DefaultPropertiesEnricher::new(
                self.config.context.default_properties.clone(),
            )));
        }
        for enricher in self.enrichers {
            enrichment.push(enricher);
        }

        let pool = TenantPool::new(self.config.tenant_config(), backend, evaluator);
        let keys = KeyStore::new(&self.config.client_keys, &self.config.server_side_tokens);

        Ok(Gateway {
            state: Arc::new(GatewayState {
                pool,
                keys,
                client_keys_header: self.config.client_keys_header_name.to_ascii_lowercase(),
                enrichment,
                enable_all_endpoint: self.config.enable_all_endpoint,
                counters: GatewayCounters::new(),
                ready: AtomicBool::new(false),
            }),
        })
    }
}
