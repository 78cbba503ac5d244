//! togglegate-core: tenant pooling, flag snapshots and usage metrics
//!
//! The machinery behind the togglegate feature-flag gateway, independent of any
//! HTTP surface. One [`TenantClient`] per logical application keeps a cached
//! definitions snapshot warm and counts evaluations; the [`TenantPool`] creates
//! clients lazily with single-flight semantics and evicts idle ones.
//!
//! # Architecture
//!
//! ```text
//! request ──► EnrichmentPipeline ──► TenantPool::resolve(app)
//!                                         │
//!                                         ▼
//!                                   TenantClient ──► ToggleEvaluator
//!                                    │        │
//!                         refresh loop        MetricsAggregator ──► flush loop
//!                                    │                                 │
//!                                    └──────────► FlagBackend ◄────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use togglegate_core::{Context, StrategyEvaluator, TenantConfig, TenantPool};
//! # async fn run(backend: Arc<dyn togglegate_core::FlagBackend>) -> togglegate_core::GatewayResult<()> {
//! let pool = TenantPool::new(TenantConfig::default(), backend, Arc::new(StrategyEvaluator));
//! pool.start_sweeper();
//!
//! let client = pool.resolve("checkout-web").await?;
//! let enabled = client.get_enabled_toggles(&Context::new().with_user_id("42"));
//! println!("{} toggles on", enabled.len());
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod context;
pub mod enrich;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod tenant;
pub mod toggle;

pub use backend::{ClientRegistration, FetchOutcome, FetchRequest, FlagBackend, MetricsPayload};
pub use context::Context;
pub use enrich::{ContextEnricher, DefaultPropertiesEnricher, EnrichmentPipeline};
pub use error::{BackendError, BackendResult, GatewayError, GatewayResult};
pub use evaluator::{StrategyEvaluator, ToggleEvaluator};
pub use metrics::{
    FlushOutcome, MetricsAggregator, MetricsBucket, ToggleCounts, ToggleCountsMap,
};
pub use tenant::{PoolStats, Snapshot, TenantClient, TenantConfig, TenantPool};
pub use toggle::{
    Evaluation, FeaturesResponse, Payload, Strategy, ToggleDefinition, ToggleResult, Variant,
    VariantDefinition,
};
