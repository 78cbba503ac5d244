//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use http::{HeaderMap, Request, StatusCode};
use parking_lot::Mutex;
use togglegate::{Gateway, GatewayConfig};
use togglegate_core::{
    BackendError, BackendResult, ClientRegistration, FetchOutcome, FetchRequest, FlagBackend,
    MetricsPayload, Strategy, ToggleDefinition,
};
use tower::ServiceExt;

pub const CLIENT_KEY: &str = "client-secret";
pub const SERVER_TOKEN: &str = "server-secret";

/// In-memory flag backend
#[derive(Debug, Default)]
pub struct StubBackend {
    definitions: Mutex<Vec<ToggleDefinition>>,
    fail_fetch: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    pub fetches: AtomicUsize,
    pub registrations: AtomicUsize,
    pub sent: Mutex<Vec<MetricsPayload>>,
}

impl StubBackend {
    pub fn new(definitions: Vec<ToggleDefinition>) -> Arc<Self> {
        let backend = Self::default();
        *backend.definitions.lock() = definitions;
        Arc::new(backend)
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlagBackend for StubBackend {
    async fn fetch_definitions(&self, _request: &FetchRequest) -> BackendResult<FetchOutcome> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::transport("connection refused"));
        }
        Ok(FetchOutcome::Modified {
            definitions: self.definitions.lock().clone(),
            etag: None,
        })
    }

    async fn register_client(&self, _registration: &ClientRegistration) -> BackendResult<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_metrics(&self, payload: &MetricsPayload) -> BackendResult<()> {
        self.sent.lock().push(payload.clone());
        Ok(())
    }
}

pub fn sample_toggles() -> Vec<ToggleDefinition> {
    vec![
        ToggleDefinition::enabled("new-checkout"),
        ToggleDefinition::disabled("dark-mode"),
        ToggleDefinition::enabled("beta-users").with_strategies(vec![
            Strategy::new("userWithId").with_parameter("userIds", "42,43"),
        ]),
        ToggleDefinition::enabled("office-only").with_strategies(vec![
            Strategy::new("remoteAddress").with_parameter("IPs", "10.1.2.3"),
        ]),
    ]
}

/// Configuration with loops slow enough that tests never see them tick
pub fn test_config() -> GatewayConfig {
    GatewayConfig::builder()
        .upstream_url("http://127.0.0.1:9/api")
        .client_key(CLIENT_KEY)
        .server_side_token(SERVER_TOKEN)
        .instance_id("gateway-test")
        .refresh_interval(Duration::from_secs(3600))
        .metrics_interval(Duration::from_secs(3600))
        .build()
}

/// Build and start a gateway on top of `backend`
pub fn started_gateway(backend: &Arc<StubBackend>, config: GatewayConfig) -> Gateway {
    let gateway = Gateway::builder(config)
        .backend(backend.clone())
        .build()
        .unwrap();
    gateway.start();
    gateway
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }

    /// Toggle names of a `{"toggles": [...]}` body, in response order
    pub fn toggle_names(&self) -> Vec<String> {
        self.json()["toggles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        body: body.to_vec(),
    }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", token);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, token: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}
