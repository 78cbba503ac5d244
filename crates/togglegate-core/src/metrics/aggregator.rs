//! Metrics aggregator: counts evaluations into the active bucket and ships
//! detached buckets upstream

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::bucket::{MetricsBucket, ToggleCountsMap};
use crate::backend::{FlagBackend, MetricsPayload, bounded};

/// What a flush did with the detached bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was counted; nothing was sent
    Empty,
    /// Delivered, possibly on the retry
    Sent { attempts: u32 },
    /// Both attempts failed and the bucket was discarded
    Dropped,
}

/// Where flushed buckets are addressed
#[derive(Debug, Clone)]
pub struct MetricsTarget {
    pub app_name: String,
    pub instance_id: String,
    pub environment: Option<String>,
}

/// Owns the active bucket of one tenant
///
/// `record` and `merge` take the bucket lock for a handful of map updates;
/// `detach` swaps the whole bucket under the same lock, so every count lands in
/// exactly one window.
#[derive(Debug)]
pub struct MetricsAggregator {
    active: Mutex<MetricsBucket>,
}

impl MetricsAggregator {
    /// Create an aggregator with a window opened now
    pub fn new() -> Self {
        Self {
            active: Mutex::new(MetricsBucket::new(Utc::now())),
        }
    }

    /// Count one evaluation outcome
    pub fn record(&self, toggle: &str, enabled: bool, variant: Option<&str>) {
        self.active.lock().record(toggle, enabled, variant);
    }

    /// Merge counts reported by a downstream SDK
    pub fn merge(&self, toggles: &ToggleCountsMap) {
        self.active.lock().merge(toggles);
    }

    /// Copy of the active window
    pub fn peek(&self) -> MetricsBucket {
        self.active.lock().clone()
    }

    /// Swap in a fresh window and return the closed one
    pub fn detach(&self) -> MetricsBucket {
        let now = Utc::now();
        let old = mem::replace(&mut *self.active.lock(), MetricsBucket::new(now));
        old.close(now)
    }

    /// Detach the active window and send it
    ///
    /// A failed send is retried once immediately; if that fails too the bucket
    /// is dropped with a warning. Never returns an error.
    pub async fn flush(
        &self,
        backend: &Arc<dyn FlagBackend>,
        target: &MetricsTarget,
        timeout: Duration,
    ) -> FlushOutcome {
        let bucket = self.detach();
        if bucket.is_empty() {
            return FlushOutcome::Empty;
        }

        let payload = MetricsPayload {
            app_name: target.app_name.clone(),
            instance_id: target.instance_id.clone(),
            environment: target.environment.clone(),
            bucket,
        };

        let mut last_error = None;
        for attempt in 1..=2u32 {
            match bounded("send_metrics", timeout, backend.send_metrics(&payload)).await {
                Ok(()) => {
                    debug!(
                        app_name = %payload.app_name,
                        toggles = payload.bucket.toggles.len(),
                        evaluations = payload.bucket.total(),
                        attempt,
                        "Metrics flushed"
                    );
                    return FlushOutcome::Sent { attempts: attempt };
                }
                Err(e) => last_error = Some(e),
            }
        }

        warn!(
            app_name = %payload.app_name,
            evaluations = payload.bucket.total(),
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "Dropping metrics bucket after retry"
        );
        FlushOutcome::Dropped
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
