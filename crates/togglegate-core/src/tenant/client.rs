//! Tenant client
//!
//! Holds the definitions snapshot of one application behind an `ArcSwap`.
//! Every evaluation call loads the pointer once and works on that generation
//! only; the refresh loop is the single writer and replaces the whole snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SDK_VERSION, TenantConfig};
use crate::backend::{ClientRegistration, FetchOutcome, FetchRequest, FlagBackend, bounded};
use crate::context::Context;
use crate::error::{GatewayError, GatewayResult};
use crate::evaluator::ToggleEvaluator;
use crate::metrics::{FlushOutcome, MetricsAggregator, MetricsTarget, ToggleCountsMap};
use crate::toggle::{FeaturesResponse, ToggleDefinition, ToggleResult};

/// One generation of flag definitions
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    definitions: Vec<ToggleDefinition>,
    index: HashMap<String, usize>,
    etag: Option<String>,
    fetched_at: DateTime<Utc>,
}

impl Snapshot {
    fn new(generation: u64, definitions: Vec<ToggleDefinition>, etag: Option<String>) -> Self {
        let index = definitions
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.clone(), i))
            .collect();
        Self {
            generation,
            definitions,
            index,
            etag,
            fetched_at: Utc::now(),
        }
    }

    /// Monotonic counter, bumped on every applied refresh
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Definitions in backend order
    pub fn definitions(&self) -> &[ToggleDefinition] {
        &self.definitions
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> Option<&ToggleDefinition> {
        self.index.get(name).map(|&i| &self.definitions[i])
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Cached flag state and metrics for one logical application
#[derive(Debug)]
pub struct TenantClient {
    app_name: String,
    config: TenantConfig,
    snapshot: ArcSwap<Snapshot>,
    ready: AtomicBool,
    last_used: Mutex<Instant>,
    metrics: MetricsAggregator,
    evaluator: Arc<dyn ToggleEvaluator>,
    backend: Arc<dyn FlagBackend>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TenantClient {
    /// Build a client: fetch the first snapshot, register, start background loops
    ///
    /// The returned client is ready. Registration failures are logged and do not
    /// fail the build; only the definitions fetch does.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::BackendUnavailable` if the initial fetch fails or
    /// times out.
    pub async fn build(
        app_name: impl Into<String>,
        config: TenantConfig,
        backend: Arc<dyn FlagBackend>,
        evaluator: Arc<dyn ToggleEvaluator>,
    ) -> GatewayResult<Arc<Self>> {
        let app_name = app_name.into();
        let request = FetchRequest {
            app_name: app_name.clone(),
            instance_id: config.instance_id.clone(),
            environment: config.environment.clone(),
            etag: None,
        };

        let outcome = bounded(
            "fetch_definitions",
            config.backend_timeout,
            backend.fetch_definitions(&request),
        )
        .await
        .map_err(|e| GatewayError::backend_unavailable_for(e.to_string(), app_name.as_str()))?;

        let snapshot = match outcome {
            FetchOutcome::Modified { definitions, etag } => Snapshot::new(1, definitions, etag),
            FetchOutcome::NotModified => Snapshot::new(1, Vec::new(), None),
        };

        let client = Arc::new(Self {
            app_name,
            config,
            snapshot: ArcSwap::from_pointee(snapshot),
            ready: AtomicBool::new(true),
            last_used: Mutex::new(Instant::now()),
            metrics: MetricsAggregator::new(),
            evaluator,
            backend,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        if client.config.metrics_enabled() {
            client.register().await;
        }
        client.start_loops();

        Ok(client)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// True once the first snapshot is in place, false after shutdown
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Generation of the current snapshot
    pub fn generation(&self) -> u64 {
        self.snapshot.load().generation
    }

    /// Evaluate every cached toggle and return the enabled ones
    pub fn get_enabled_toggles(&self, context: &Context) -> Vec<ToggleResult> {
        self.touch();
        let snapshot = self.snapshot.load();
        snapshot
            .definitions
            .iter()
            .map(|def| self.evaluate(def, context))
            .filter(|result| result.enabled)
            .collect()
    }

    /// Evaluate and return every cached toggle
    pub fn get_all_toggles(&self, context: &Context) -> Vec<ToggleResult> {
        self.touch();
        let snapshot = self.snapshot.load();
        snapshot
            .definitions
            .iter()
            .map(|def| self.evaluate(def, context))
            .collect()
    }

    /// Evaluate the named toggles only
    ///
    /// Names missing from the snapshot are left out of the result.
    pub fn get_defined_toggles<S: AsRef<str>>(
        &self,
        names: &[S],
        context: &Context,
    ) -> Vec<ToggleResult> {
        self.touch();
        let snapshot = self.snapshot.load();
        names
            .iter()
            .filter_map(|name| snapshot.get(name.as_ref()))
            .map(|def| self.evaluate(def, context))
            .collect()
    }

    /// Merge counts reported by a downstream SDK into the active bucket
    pub fn register_metrics(&self, toggles: &ToggleCountsMap) {
        if self.config.metrics_enabled() {
            self.metrics.merge(toggles);
        }
    }

    /// Raw definitions in backend wire format
    pub fn feature_definitions(&self) -> FeaturesResponse {
        FeaturesResponse::new(self.snapshot.load().definitions.clone())
    }

    /// Access the metrics aggregator
    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    /// Fetch definitions once and swap the snapshot if they changed
    ///
    /// Returns whether a new generation was installed. On failure the previous
    /// snapshot stays in place.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::BackendUnavailable` if the fetch fails or times out.
    pub async fn refresh(&self) -> GatewayResult<bool> {
        let current = self.snapshot.load_full();
        let request = FetchRequest {
            app_name: self.app_name.clone(),
            instance_id: self.config.instance_id.clone(),
            environment: self.config.environment.clone(),
            etag: current.etag.clone(),
        };

        let outcome = bounded(
            "fetch_definitions",
            self.config.backend_timeout,
            self.backend.fetch_definitions(&request),
        )
        .await;

        match outcome {
            Ok(FetchOutcome::Modified { definitions, etag }) => {
                let next = Snapshot::new(current.generation + 1, definitions, etag);
                debug!(
                    app_name = %self.app_name,
                    generation = next.generation,
                    toggles = next.definitions.len(),
                    "Applied refreshed definitions"
                );
                self.snapshot.store(Arc::new(next));
                Ok(true)
            }
            Ok(FetchOutcome::NotModified) => Ok(false),
            Err(e) => {
                warn!(
                    app_name = %self.app_name,
                    generation = current.generation,
                    error = %e,
                    "Definitions refresh failed, keeping previous snapshot"
                );
                Err(GatewayError::backend_unavailable_for(
                    e.to_string(),
                    self.app_name.as_str(),
                ))
            }
        }
    }

    /// Detach the active metrics bucket and send it
    pub async fn flush_metrics(&self) -> FlushOutcome {
        let target = MetricsTarget {
            app_name: self.app_name.clone(),
            instance_id: self.config.instance_id.clone(),
            environment: self.config.environment.clone(),
        };
        self.metrics
            .flush(&self.backend, &target, self.config.backend_timeout)
            .await
    }

    /// Stop background loops, wait for them, and flush the last bucket
    pub async fn shutdown(&self) {
        self.ready.store(false, Ordering::Release);
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(app_name = %self.app_name, error = %e, "Tenant task ended abnormally");
            }
        }

        if self.config.metrics_enabled() {
            self.flush_metrics().await;
        }
        debug!(app_name = %self.app_name, "Tenant client shut down");
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }

    fn evaluate(&self, definition: &ToggleDefinition, context: &Context) -> ToggleResult {
        let evaluation = self.evaluator.evaluate(definition, context);
        if self.config.metrics_enabled() {
            let variant = evaluation
                .enabled
                .then_some(evaluation.variant.name.as_str());
            self.metrics
                .record(&definition.name, evaluation.enabled, variant);
        }
        ToggleResult {
            name: definition.name.clone(),
            enabled: evaluation.enabled,
            variant: evaluation.variant,
            impression_data: definition.impression_data,
        }
    }

    async fn register(&self) {
        let registration = ClientRegistration {
            app_name: self.app_name.clone(),
            instance_id: self.config.instance_id.clone(),
            sdk_version: SDK_VERSION.to_string(),
            strategies: self.evaluator.supported_strategies(),
            started: Utc::now(),
            interval: self.config.refresh_interval.as_millis() as u64,
        };

        let result = bounded(
            "register_client",
            self.config.backend_timeout,
            self.backend.register_client(&registration),
        )
        .await;

        if let Err(e) = result {
            warn!(app_name = %self.app_name, error = %e, "Client registration failed");
        }
    }

    fn start_loops(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        tasks.push(spawn_periodic(
            Arc::downgrade(self),
            self.cancel.clone(),
            self.config.refresh_interval,
            Duration::ZERO,
            |client| async move {
                // Failures are logged inside refresh and retried next tick
                let _ = client.refresh().await;
            },
        ));

        if self.config.metrics_enabled() {
            tasks.push(spawn_periodic(
                Arc::downgrade(self),
                self.cancel.clone(),
                self.config.metrics_interval,
                self.config.metrics_jitter,
                |client| async move {
                    client.flush_metrics().await;
                },
            ));
        }

        info!(
            app_name = %self.app_name,
            toggles = self.snapshot.load().definitions.len(),
            refresh_ms = self.config.refresh_interval.as_millis() as u64,
            "Tenant loops started"
        );
    }
}

/// Run `tick` every `period`, each run delayed by a random share of `jitter`,
/// until cancelled or the client is dropped
fn spawn_periodic<F, Fut>(
    client: Weak<TenantClient>,
    cancel: CancellationToken,
    period: Duration,
    jitter: Duration,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<TenantClient>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !jitter.is_zero() {
                        let delay = jitter.mul_f64(fastrand::f64());
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    let Some(client) = client.upgrade() else { break };
                    tick(client).await;
                }
            }
        }
    })
}
