//! Process counters and their Prometheus rendering
//!
//! Lock-free atomics bumped by the request handlers, combined with the pool's
//! own counters when scraped. Rendering goes through a Prometheus recorder
//! owned by the gateway, so several gateways in one process never share series.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::Serialize;
use togglegate_core::PoolStats;

/// Request counters of the HTTP front
pub struct GatewayCounters {
    requests: AtomicU64,
    unauthorized: AtomicU64,
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl std::fmt::Debug for GatewayCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayCounters")
            .field("requests", &self.requests)
            .field("unauthorized", &self.unauthorized)
            .field("recorder", &"<PrometheusRecorder>")
            .finish()
    }
}

impl Default for GatewayCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayCounters {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!("togglegate_up", "Indication that the service is up.");
            describe_counter!("togglegate_requests_total", "Toggle requests served.");
            describe_counter!(
                "togglegate_unauthorized_total",
                "Requests rejected for a missing or unknown token."
            );
            describe_counter!("togglegate_tenant_builds_total", "Tenant clients built.");
            describe_counter!(
                "togglegate_tenant_build_failures_total",
                "Tenant builds that failed."
            );
            describe_counter!(
                "togglegate_tenant_evictions_total",
                "Tenants evicted for idleness."
            );
            describe_gauge!("togglegate_live_tenants", "Tenants currently live.");
        });

        Self {
            requests: AtomicU64::new(0),
            unauthorized: AtomicU64::new(0),
            recorder,
            handle,
        }
    }

    /// Count a request that produced a toggle response
    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected token
    pub fn inc_unauthorized(&self) {
        self.unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters at once
    ///
    /// Each value is read atomically; the set as a whole is not.
    pub fn snapshot(&self, pool: PoolStats) -> CountersSnapshot {
        CountersSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            tenant_builds: pool.builds,
            tenant_build_failures: pool.build_failures,
            tenant_evictions: pool.evictions,
            live_tenants: pool.live as u64,
        }
    }

    /// Publish the current values and render them in the Prometheus text format
    pub fn render(&self, pool: PoolStats) -> String {
        let snapshot = self.snapshot(pool);
        metrics::with_local_recorder(&self.recorder, || {
            counter!("togglegate_up").absolute(1);
            counter!("togglegate_requests_total").absolute(snapshot.requests);
            counter!("togglegate_unauthorized_total").absolute(snapshot.unauthorized);
            counter!("togglegate_tenant_builds_total").absolute(snapshot.tenant_builds);
            counter!("togglegate_tenant_build_failures_total")
                .absolute(snapshot.tenant_build_failures);
            counter!("togglegate_tenant_evictions_total").absolute(snapshot.tenant_evictions);
            gauge!("togglegate_live_tenants").set(snapshot.live_tenants as f64);
        });
        self.handle.render()
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub requests: u64,
    pub unauthorized: u64,
    pub tenant_builds: u64,
    pub tenant_build_failures: u64,
    pub tenant_evictions: u64,
    pub live_tenants: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = GatewayCounters::new();
        counters.inc_requests();
        counters.inc_requests();
        counters.inc_unauthorized();

        let stats = PoolStats {
            live: 3,
            builds: 4,
            build_failures: 1,
            ..PoolStats::default()
        };
        let snapshot = counters.snapshot(stats);
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.unauthorized, 1);
        assert_eq!(snapshot.tenant_builds, 4);
        assert_eq!(snapshot.live_tenants, 3);
    }

    #[test]
    fn test_prometheus_render() {
        let counters = GatewayCounters::new();
        for _ in 0..9 {
            counters.inc_requests();
        }

        let text = counters.render(PoolStats {
            live: 2,
            ..PoolStats::default()
        });
        assert!(text.contains("# TYPE togglegate_up counter"));
        assert!(text.contains("togglegate_up 1"));
        assert!(text.contains("# HELP togglegate_requests_total Toggle requests served."));
        assert!(text.contains("togglegate_requests_total 9"));
        assert!(text.contains("# TYPE togglegate_live_tenants gauge"));
        assert!(text.contains("togglegate_live_tenants 2"));
    }

    #[test]
    fn test_render_tracks_later_values() {
        let counters = GatewayCounters::new();
        counters.render(PoolStats::default());
        counters.inc_unauthorized();

        let text = counters.render(PoolStats::default());
        assert!(text.contains("togglegate_unauthorized_total 1"));
    }

    #[test]
    fn test_gateways_do_not_share_series() {
        let first = GatewayCounters::new();
        let second = GatewayCounters::new();
        first.inc_requests();

        assert!(first.render(PoolStats::default()).contains("togglegate_requests_total 1"));
        assert!(second.render(PoolStats::default()).contains("togglegate_requests_total 0"));
    }
}
