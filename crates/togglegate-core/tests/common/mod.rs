//! Shared test fixtures for togglegate-core integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use togglegate_core::{
    BackendError, BackendResult, ClientRegistration, FetchOutcome, FetchRequest, FlagBackend,
    MetricsPayload, StrategyEvaluator, TenantConfig, TenantPool, ToggleDefinition,
};

/// In-memory backend that counts calls and can be told to fail or stall
#[derive(Debug, Default)]
pub struct MockBackend {
    definitions: Mutex<Vec<ToggleDefinition>>,
    version: AtomicU64,
    fetch_delay: Mutex<Option<Duration>>,
    fail_fetch: AtomicBool,
    fail_register: AtomicBool,
    metrics_failures_left: AtomicUsize,
    pub fetches: AtomicUsize,
    pub registrations: AtomicUsize,
    pub metric_attempts: AtomicUsize,
    pub sent: Mutex<Vec<MetricsPayload>>,
    pub requests: Mutex<Vec<FetchRequest>>,
}

impl MockBackend {
    pub fn new(definitions: Vec<ToggleDefinition>) -> Arc<Self> {
        let backend = Self::default();
        *backend.definitions.lock() = definitions;
        backend.version.store(1, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn set_definitions(&self, definitions: Vec<ToggleDefinition>) {
        *self.definitions.lock() = definitions;
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` metrics deliveries
    pub fn fail_next_metrics(&self, n: usize) {
        self.metrics_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Sum of yes + no over every delivered bucket
    pub fn sent_total(&self) -> u64 {
        self.sent.lock().iter().map(|p| p.bucket.total()).sum()
    }

    fn etag(&self) -> String {
        format!("\"v{}\"", self.version.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl FlagBackend for MockBackend {
    async fn fetch_definitions(&self, request: &FetchRequest) -> BackendResult<FetchOutcome> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::transport("connection refused"));
        }

        let etag = self.etag();
        if request.etag.as_deref() == Some(etag.as_str()) {
            return Ok(FetchOutcome::NotModified);
        }

        Ok(FetchOutcome::Modified {
            definitions: self.definitions.lock().clone(),
            etag: Some(etag),
        })
    }

    async fn register_client(&self, _registration: &ClientRegistration) -> BackendResult<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(BackendError::status(500, "register down"));
        }
        Ok(())
    }

    async fn send_metrics(&self, payload: &MetricsPayload) -> BackendResult<()> {
        self.metric_attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .metrics_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BackendError::status(503, "metrics down"));
        }
        self.sent.lock().push(payload.clone());
        Ok(())
    }
}

/// Config with long loop periods so tests drive refresh and flush by hand
pub fn quiet_config() -> TenantConfig {
    TenantConfig {
        instance_id: "test-instance".to_string(),
        environment: Some("test".to_string()),
        refresh_interval: Duration::from_secs(3600),
        metrics_interval: Duration::from_secs(3600),
        metrics_jitter: Duration::ZERO,
        backend_timeout: Duration::from_secs(5),
        disable_metrics: false,
        ttl: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(15),
    }
}

pub fn pool_with(backend: &Arc<MockBackend>, config: TenantConfig) -> Arc<TenantPool> {
    TenantPool::new(config, backend.clone(), Arc::new(StrategyEvaluator))
}

pub fn sample_toggles() -> Vec<ToggleDefinition> {
    vec![
        ToggleDefinition::enabled("new-checkout"),
        ToggleDefinition::disabled("dark-mode"),
        ToggleDefinition::enabled("beta-users").with_strategies(vec![
            togglegate_core::Strategy::new("userWithId").with_parameter("userIds", "42,43"),
        ]),
    ]
}
