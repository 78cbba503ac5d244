//! Flag-management backend seam
//!
//! Tenant clients talk to the upstream only through [`FlagBackend`]. The HTTP
//! implementation lives in the `togglegate` crate; tests use in-memory doubles.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};
use crate::metrics::MetricsBucket;
use crate::toggle::ToggleDefinition;

/// Parameters of a definitions fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Tenant the definitions are fetched for
    pub app_name: String,
    /// Instance id reported to the backend
    pub instance_id: String,
    /// Environment requested, if any
    pub environment: Option<String>,
    /// ETag of the snapshot currently held, for conditional fetches
    pub etag: Option<String>,
}

/// Result of a definitions fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A new snapshot
    Modified {
        definitions: Vec<ToggleDefinition>,
        etag: Option<String>,
    },
    /// The held snapshot is still current
    NotModified,
}

/// Client registration sent once per tenant after its first successful fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub app_name: String,
    pub instance_id: String,
    pub sdk_version: String,
    pub strategies: Vec<String>,
    pub started: DateTime<Utc>,
    /// Refresh interval in milliseconds
    pub interval: u64,
}

/// One flushed bucket, addressed to the backend's metrics endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPayload {
    pub app_name: String,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub bucket: MetricsBucket,
}

/// Upstream flag-management backend
///
/// Implementations should bound each call with their own timeout. Callers in
/// this crate additionally wrap every call in `tokio::time::timeout`.
#[async_trait]
pub trait FlagBackend: Send + Sync + std::fmt::Debug {
    /// Fetch the current definitions for a tenant
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failures, non-success statuses and
    /// undecodable bodies.
    async fn fetch_definitions(&self, request: &FetchRequest) -> BackendResult<FetchOutcome>;

    /// Announce a tenant to the backend
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend rejects or cannot receive the call.
    async fn register_client(&self, registration: &ClientRegistration) -> BackendResult<()>;

    /// Deliver one metrics bucket
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend rejects or cannot receive the call.
    async fn send_metrics(&self, payload: &MetricsPayload) -> BackendResult<()>;
}

/// Run one backend call under a deadline
///
/// # Errors
///
/// Returns the call's own error, or `BackendError::Timeout` if it did not
/// finish within `timeout`.
pub async fn bounded<T, F>(operation: &str, timeout: Duration, call: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| {
            Err(BackendError::Timeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        })
}
