//! Tenant pool with single-flight creation and idle eviction
//!
//! ## Slots
//!
//! Each application name maps to one slot:
//!
//! - **Building**: a build task is running. The slot holds a `watch` receiver
//!   that resolves to the build result; every caller that finds the slot waits
//!   on it instead of starting its own build.
//! - **Live**: the client is ready and shared by all callers.
//!
//! The build itself runs in its own task, so a caller that gives up waiting
//! does not abandon the build for everybody else. A failed build removes the
//! slot; the next request starts a fresh one.
//!
//! ## Eviction
//!
//! The sweep only ever removes live slots idle for longer than the TTL. A
//! building slot is never touched.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{TenantClient, TenantConfig};
use crate::backend::FlagBackend;
use crate::error::{GatewayError, GatewayResult};
use crate::evaluator::ToggleEvaluator;

type BuildResult = Option<GatewayResult<Arc<TenantClient>>>;

enum Slot {
    Building(watch::Receiver<BuildResult>),
    Live(Arc<TenantClient>),
}

impl Slot {
    fn is_idle_live(&self, now: Instant, ttl: std::time::Duration) -> bool {
        matches!(self, Self::Live(client) if client.idle_for(now) > ttl)
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live tenants
    pub live: usize,
    /// Builds in flight
    pub building: usize,
    /// Successful builds since start
    pub builds: u64,
    /// Failed builds since start
    pub build_failures: u64,
    /// Evicted tenants since start
    pub evictions: u64,
}

/// Maps application names to tenant clients
pub struct TenantPool {
    entries: DashMap<String, Slot>,
    config: TenantConfig,
    backend: Arc<dyn FlagBackend>,
    evaluator: Arc<dyn ToggleEvaluator>,
    closed: AtomicBool,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    builds: AtomicU64,
    build_failures: AtomicU64,
    evictions: AtomicU64,
}

impl fmt::Debug for TenantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantPool")
            .field("tenants", &self.entries.len())
            .field("ttl", &self.config.ttl)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TenantPool {
    /// Create an empty pool
    ///
    /// The eviction sweep does not run until [`TenantPool::start_sweeper`].
    pub fn new(
        config: TenantConfig,
        backend: Arc<dyn FlagBackend>,
        evaluator: Arc<dyn ToggleEvaluator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            config,
            backend,
            evaluator,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
            builds: AtomicU64::new(0),
            build_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    /// Return the live client for `app_name`, building it on first use
    ///
    /// Warm lookups never suspend. On a cold lookup the caller waits for the
    /// single build in flight for that name.
    ///
    /// # Errors
    ///
    /// - `GatewayError::NotReady` if the pool is shut down
    /// - `GatewayError::BackendUnavailable` if the build fails; every caller
    ///   waiting on the same build gets the same error
    pub async fn resolve(self: &Arc<Self>, app_name: &str) -> GatewayResult<Arc<TenantClient>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::not_ready("tenant pool is shut down"));
        }

        if let Some(slot) = self.entries.get(app_name)
            && let Slot::Live(client) = slot.value()
        {
            client.touch();
            return Ok(Arc::clone(client));
        }

        let mut rx = match self.entries.entry(app_name.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Live(client) => {
                    client.touch();
                    return Ok(Arc::clone(client));
                }
                Slot::Building(rx) => rx.clone(),
            },
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(Slot::Building(rx.clone()));
                debug!(app_name, "Starting tenant build");
                self.spawn_build(app_name.to_string(), tx);
                rx
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|result| result.clone());

        match outcome {
            Ok(Some(Ok(client))) => {
                client.touch();
                Ok(client)
            }
            Ok(Some(Err(e))) => Err(e),
            Ok(None) | Err(_) => Err(GatewayError::backend_unavailable_for(
                "tenant build aborted",
                app_name,
            )),
        }
    }

    /// Live client for `app_name`, without building one
    pub fn get(&self, app_name: &str) -> Option<Arc<TenantClient>> {
        self.entries.get(app_name).and_then(|slot| match slot.value() {
            Slot::Live(client) => Some(Arc::clone(client)),
            Slot::Building(_) => None,
        })
    }

    /// Names of live tenants
    pub fn live_app_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Live(_)))
            .map(|slot| slot.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> PoolStats {
        let (mut live, mut building) = (0, 0);
        for slot in &self.entries {
            match slot.value() {
                Slot::Live(_) => live += 1,
                Slot::Building(_) => building += 1,
            }
        }
        PoolStats {
            live,
            building,
            builds: self.builds.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict live tenants idle for longer than the TTL at `now`
    ///
    /// Evicted clients are shut down (loops joined, final flush attempted)
    /// before this returns. Returns the evicted names.
    pub async fn sweep(&self, now: Instant) -> Vec<String> {
        let ttl = self.config.ttl;
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|slot| slot.value().is_idle_live(now, ttl))
            .map(|slot| slot.key().clone())
            .collect();

        let mut evicted = Vec::new();
        for name in candidates {
            // Re-checked under the shard lock: the tenant may have been used since
            if let Some((name, Slot::Live(client))) = self
                .entries
                .remove_if(&name, |_, slot| slot.is_idle_live(now, ttl))
            {
                client.shutdown().await;
                evicted.push(name);
            }
        }

        if !evicted.is_empty() {
            self.evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            info!(evicted = ?evicted, "Evicted idle tenants");
        }
        debug!(active = ?self.live_app_names(), "Active tenants");
        evicted
    }

    /// Start the periodic eviction sweep
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let pool: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let period = self.config.sweep_interval;

        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.sweep(Instant::now()).await;
                    }
                }
            }
        }));
    }

    /// Stop the sweep and shut down every tenant
    ///
    /// Builds still in flight finish on their own and shut their client down
    /// instead of publishing it. A build publishing concurrently with this call
    /// sees the pool closed after its insert and takes the client back out.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Eviction sweep ended abnormally");
        }

        let names: Vec<String> = self.entries.iter().map(|slot| slot.key().clone()).collect();
        let mut stopped = 0usize;
        for name in names {
            if let Some((_, Slot::Live(client))) = self.entries.remove(&name) {
                client.shutdown().await;
                stopped += 1;
            }
        }
        info!(tenants = stopped, "Tenant pool shut down");
    }

    fn spawn_build(self: &Arc<Self>, app_name: String, tx: watch::Sender<BuildResult>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut guard = BuildGuard {
                pool: Arc::clone(&pool),
                app_name: app_name.clone(),
                armed: true,
            };
            let started = Instant::now();

            let result = TenantClient::build(
                app_name.as_str(),
                pool.config.clone(),
                Arc::clone(&pool.backend),
                Arc::clone(&pool.evaluator),
            )
            .await;

            let result = match result {
                Ok(client) => {
                    pool.entries
                        .insert(app_name.clone(), Slot::Live(Arc::clone(&client)));
                    pool.publish(&app_name, client, started).await
                }
                Err(e) => {
                    pool.entries.remove(&app_name);
                    pool.build_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        app_name = %app_name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Tenant client build failed"
                    );
                    Err(e)
                }
            };

            guard.armed = false;
            tx.send_replace(Some(result));
        });
    }

    /// Confirm a freshly inserted client, or withdraw it if the pool closed
    ///
    /// `closed` is read after the insert: either shutdown's sweep of the
    /// entries sees this client, or this check sees the pool closed.
    async fn publish(
        &self,
        app_name: &str,
        client: Arc<TenantClient>,
        started: Instant,
    ) -> GatewayResult<Arc<TenantClient>> {
        if self.closed.load(Ordering::SeqCst) {
            let withdrawn = self
                .entries
                .remove_if(app_name, |_, slot| {
                    matches!(slot, Slot::Live(live) if Arc::ptr_eq(live, &client))
                })
                .is_some();
            if withdrawn {
                client.shutdown().await;
            }
            debug!(app_name, "Tenant built after shutdown, discarded");
            return Err(GatewayError::not_ready("tenant pool is shut down"));
        }

        self.builds.fetch_add(1, Ordering::Relaxed);
        info!(
            app_name,
            toggles = client.snapshot().definitions().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tenant client built"
        );
        Ok(client)
    }
}

/// Removes a building slot if its build task dies before publishing a result
struct BuildGuard {
    pool: Arc<TenantPool>,
    app_name: String,
    armed: bool,
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pool
                .entries
                .remove_if(&self.app_name, |_, slot| matches!(slot, Slot::Building(_)));
        }
    }
}
