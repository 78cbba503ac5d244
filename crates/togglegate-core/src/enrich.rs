//! Context enrichment pipeline
//!
//! Enrichers run in order, each receiving the context produced by the one
//! before it. The first failure aborts the whole chain and the request with it;
//! a partially enriched context is never evaluated.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::error::{GatewayError, GatewayResult};

/// One asynchronous context transformation
#[async_trait]
pub trait ContextEnricher: Send + Sync + std::fmt::Debug {
    /// Name used in logs and enrichment errors
    fn name(&self) -> &str;

    /// Produce the enriched context
    ///
    /// # Errors
    ///
    /// Any error aborts the request. Errors that are not already
    /// `EnrichmentFailure` are wrapped into one naming this enricher.
    async fn enrich(&self, context: Context) -> GatewayResult<Context>;
}

/// Ordered chain of enrichers
#[derive(Debug, Clone, Default)]
pub struct EnrichmentPipeline {
    enrichers: Vec<Arc<dyn ContextEnricher>>,
}

impl EnrichmentPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an enricher
    #[must_use]
    pub fn with(mut self, enricher: Arc<dyn ContextEnricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    /// Append an enricher in place
    pub fn push(&mut self, enricher: Arc<dyn ContextEnricher>) {
        self.enrichers.push(enricher);
    }

    pub fn len(&self) -> usize {
        self.enrichers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }

    /// Run every enricher in order
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::EnrichmentFailure` from the first enricher that
    /// fails; later enrichers are not run.
    pub async fn enrich(&self, context: Context) -> GatewayResult<Context> {
        let mut context = context;
        for enricher in &self.enrichers {
            context = enricher.enrich(context).await.map_err(|e| match e {
                GatewayError::EnrichmentFailure { .. } => e,
                other => GatewayError::enrichment_in(other.to_string(), enricher.name()),
            })?;
        }
        Ok(context)
    }
}

/// Adds configured properties the caller did not provide
#[derive(Debug, Clone, Default)]
pub struct DefaultPropertiesEnricher {
    defaults: BTreeMap<String, String>,
}

impl DefaultPropertiesEnricher {
    pub fn new(defaults: BTreeMap<String, String>) -> Self {
        Self { defaults }
    }
}

#[async_trait]
impl ContextEnricher for DefaultPropertiesEnricher {
    fn name(&self) -> &str {
        "default-properties"
    }

    async fn enrich(&self, mut context: Context) -> GatewayResult<Context> {
        for (key, value) in &self.defaults {
            if !context.properties.contains_key(key) {
                debug!(property = %key, "Applying default context property");
                context.properties.insert(key.clone(), value.clone());
            }
        }
        Ok(context)
    }
}
