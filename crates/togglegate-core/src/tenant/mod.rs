//! Tenants: one cached flag snapshot and metrics window per logical application
//!
//! - [`TenantClient`]: snapshot, evaluation, refresh and flush loops
//! - [`TenantPool`]: single-flight creation, idle eviction, teardown

mod client;
mod pool;

pub use client::{Snapshot, TenantClient};
pub use pool::{PoolStats, TenantPool};

use std::time::Duration;

/// Version string reported to the backend on registration
pub const SDK_VERSION: &str = concat!("togglegate:", env!("CARGO_PKG_VERSION"));

/// Settings shared by every tenant client of one gateway
#[derive(Debug, Clone)]
pub struct TenantConfig {
    /// Instance id reported to the backend
    pub instance_id: String,
    /// Environment requested from and reported to the backend
    pub environment: Option<String>,
    /// Period of the definitions refresh loop
    pub refresh_interval: Duration,
    /// Period of the metrics flush loop
    pub metrics_interval: Duration,
    /// Each flush waits a random extra delay of up to this much
    pub metrics_jitter: Duration,
    /// Deadline of every single backend call
    pub backend_timeout: Duration,
    /// Skip counting, flushing and registration entirely
    pub disable_metrics: bool,
    /// A live tenant idle for longer than this is evicted
    pub ttl: Duration,
    /// Period of the eviction sweep
    pub sweep_interval: Duration,
}

impl TenantConfig {
    pub(crate) fn metrics_enabled(&self) -> bool {
        !self.disable_metrics
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        let ttl = Duration::from_secs(60 * 60);
        Self {
            instance_id: format!("togglegate-{}", uuid::Uuid::new_v4()),
            environment: None,
            refresh_interval: Duration::from_secs(5),
            metrics_interval: Duration::from_secs(30),
            metrics_jitter: Duration::ZERO,
            backend_timeout: Duration::from_secs(10),
            disable_metrics: false,
            ttl,
            sweep_interval: ttl / 4,
        }
    }
}
