//! Tenant client behavior: snapshots, refresh, metrics

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{MockBackend, quiet_config, sample_toggles};
use pretty_assertions::assert_eq;
use togglegate_core::{
    Context, FlushOutcome, GatewayError, Strategy, StrategyEvaluator, TenantClient,
    TenantConfig, ToggleCounts, ToggleCountsMap, ToggleDefinition,
};

async fn build(backend: &Arc<MockBackend>, config: TenantConfig) -> Arc<TenantClient> {
    TenantClient::build("app", config, backend.clone(), Arc::new(StrategyEvaluator))
        .await
        .unwrap()
}

#[tokio::test]
async fn stays_ready_when_refresh_fails() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;
    assert!(client.is_ready());
    let before = client.get_all_toggles(&Context::new());

    backend.set_definitions(vec![ToggleDefinition::enabled("replacement")]);
    backend.set_fail_fetch(true);
    let err = client.refresh().await.unwrap_err();

    assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
    assert!(client.is_ready());
    assert_eq!(client.generation(), 1);
    assert_eq!(client.get_all_toggles(&Context::new()), before);

    client.shutdown().await;
}

#[tokio::test]
async fn refresh_installs_new_generation() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    backend.set_definitions(vec![ToggleDefinition::enabled("only-one")]);
    assert!(client.refresh().await.unwrap());
    assert_eq!(client.generation(), 2);

    let names: Vec<_> = client
        .get_enabled_toggles(&Context::new())
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["only-one".to_string()]);

    client.shutdown().await;
}

#[tokio::test]
async fn unchanged_definitions_keep_generation() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    assert!(!client.refresh().await.unwrap());
    assert_eq!(client.generation(), 1);

    let requests = backend.requests.lock().clone();
    assert_eq!(requests[1].etag.as_deref(), Some("\"v1\""));

    client.shutdown().await;
}

#[tokio::test]
async fn enabled_toggles_come_from_snapshot() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    for user in ["1", "42", "43", "99"] {
        let snapshot = client.snapshot();
        let known: HashSet<_> = snapshot.definitions().iter().map(|d| &d.name).collect();
        let enabled = client.get_enabled_toggles(&Context::new().with_user_id(user));
        assert!(enabled.iter().all(|t| t.enabled && known.contains(&t.name)));
    }

    client.shutdown().await;
}

#[tokio::test]
async fn defined_toggles_omit_unknown_names() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    let results = client.get_defined_toggles(
        &["dark-mode", "does-not-exist", "new-checkout"],
        &Context::new(),
    );
    let names: Vec<_> = results.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["dark-mode", "new-checkout"]);
    assert!(!results[0].enabled);
    assert!(results[1].enabled);

    client.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluations_flush_exactly_once() {
    const TASKS: usize = 8;
    const ROUNDS: usize = 250;

    let backend = MockBackend::new(vec![ToggleDefinition::enabled("hot")]);
    let client = build(&backend, quiet_config()).await;

    let workers: Vec<_> = (0..TASKS)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    client.get_all_toggles(&Context::new());
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let flusher = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            for _ in 0..20 {
                client.flush_metrics().await;
                tokio::task::yield_now().await;
            }
        })
    };

    for worker in workers {
        worker.await.unwrap();
    }
    flusher.await.unwrap();
    client.flush_metrics().await;

    assert_eq!(backend.sent_total(), (TASKS * ROUNDS) as u64);

    client.shutdown().await;
}

#[tokio::test]
async fn registered_metrics_round_trip() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    let mut counts = ToggleCountsMap::new();
    counts.insert("toggleA".to_string(), ToggleCounts::new(5, 2));
    client.register_metrics(&counts);

    assert_eq!(client.flush_metrics().await, FlushOutcome::Sent { attempts: 1 });
    let sent = backend.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].app_name, "app");
    assert_eq!(sent[0].instance_id, "test-instance");
    assert_eq!(sent[0].environment.as_deref(), Some("test"));
    assert_eq!(sent[0].bucket.toggles["toggleA"], ToggleCounts::new(5, 2));

    client.shutdown().await;
}

#[tokio::test]
async fn flush_retries_once_then_drops() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    client.get_all_toggles(&Context::new());
    backend.fail_next_metrics(1);
    assert_eq!(client.flush_metrics().await, FlushOutcome::Sent { attempts: 2 });

    client.get_all_toggles(&Context::new());
    backend.fail_next_metrics(2);
    assert_eq!(client.flush_metrics().await, FlushOutcome::Dropped);
    assert_eq!(backend.metric_attempts.load(Ordering::SeqCst), 4);

    // The dropped bucket is gone, not requeued
    assert_eq!(client.flush_metrics().await, FlushOutcome::Empty);
    assert_eq!(backend.sent_total(), 3);

    client.shutdown().await;
}

#[tokio::test]
async fn empty_bucket_is_not_sent() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    assert_eq!(client.flush_metrics().await, FlushOutcome::Empty);
    assert_eq!(backend.metric_attempts.load(Ordering::SeqCst), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn variants_are_counted() {
    let backend = MockBackend::new(vec![
        ToggleDefinition::enabled("exp")
            .with_variant(togglegate_core::VariantDefinition::new("blue", 100)),
    ]);
    let client = build(&backend, quiet_config()).await;

    client.get_all_toggles(&Context::new().with_user_id("1"));
    client.get_all_toggles(&Context::new().with_user_id("2"));

    let bucket = client.metrics().peek();
    assert_eq!(bucket.toggles["exp"].yes, 2);
    assert_eq!(bucket.toggles["exp"].variants.get("blue"), Some(&2));

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_loop_runs_on_interval() {
    let backend = MockBackend::new(sample_toggles());
    let mut config = quiet_config();
    config.refresh_interval = Duration::from_secs(5);
    let client = build(&backend, config).await;
    assert_eq!(backend.fetch_count(), 1);

    backend.set_definitions(vec![ToggleDefinition::enabled("fresh")]);
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(backend.fetch_count(), 4);
    assert_eq!(client.generation(), 2);

    client.shutdown().await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.fetch_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn flush_loop_sends_periodically() {
    let backend = MockBackend::new(sample_toggles());
    let mut config = quiet_config();
    config.metrics_interval = Duration::from_secs(10);
    let client = build(&backend, config).await;

    client.get_all_toggles(&Context::new());
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(backend.sent.lock().len(), 1);
    assert_eq!(backend.sent_total(), 3);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flush_waits_within_jitter_window() {
    let backend = MockBackend::new(sample_toggles());
    let mut config = quiet_config();
    config.metrics_interval = Duration::from_secs(10);
    config.metrics_jitter = Duration::from_secs(5);
    let client = build(&backend, config).await;

    client.get_all_toggles(&Context::new());
    tokio::time::sleep(Duration::from_millis(9_900)).await;
    assert_eq!(backend.sent.lock().len(), 0);

    tokio::time::sleep(Duration::from_millis(5_200)).await;
    assert_eq!(backend.sent.lock().len(), 1);
    assert_eq!(backend.sent_total(), 3);

    client.shutdown().await;
}

#[tokio::test]
async fn builds_with_numeric_strategy_parameters() {
    let backend = MockBackend::new(vec![
        ToggleDefinition::enabled("rollout").with_strategies(vec![
            Strategy::new("flexibleRollout")
                .with_parameter("rollout", 50)
                .with_parameter("groupId", "rollout"),
        ]),
        ToggleDefinition::enabled("pilot")
            .with_strategies(vec![Strategy::new("userWithId").with_parameter("userIds", 42)]),
    ]);
    let client = build(&backend, quiet_config()).await;

    assert!(client.is_ready());
    let enabled = client.get_enabled_toggles(&Context::new().with_user_id("42"));
    let names: Vec<_> = enabled.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["pilot"]);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_initial_fetch_times_out() {
    let backend = MockBackend::new(sample_toggles());
    backend.set_fetch_delay(Duration::from_secs(30));
    let mut config = quiet_config();
    config.backend_timeout = Duration::from_millis(500);

    let err = TenantClient::build("app", config, backend.clone(), Arc::new(StrategyEvaluator))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
}

#[tokio::test]
async fn disabled_metrics_skip_registration_and_counting() {
    let backend = MockBackend::new(sample_toggles());
    let mut config = quiet_config();
    config.disable_metrics = true;
    let client = build(&backend, config).await;

    client.get_all_toggles(&Context::new());
    assert_eq!(backend.registration_count(), 0);
    assert!(client.metrics().peek().is_empty());

    client.shutdown().await;
    assert_eq!(backend.metric_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shutdown_flushes_final_bucket() {
    let backend = MockBackend::new(sample_toggles());
    let client = build(&backend, quiet_config()).await;

    client.get_enabled_toggles(&Context::new().with_user_id("42"));
    client.shutdown().await;

    assert!(!client.is_ready());
    assert_eq!(backend.sent_total(), 3);
}
