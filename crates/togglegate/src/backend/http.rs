//! HTTP backend for the flag-management API
//!
//! Uses reqwest with connection pooling. All three calls share one client and
//! one set of identification headers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, ETAG, HeaderMap, HeaderName, HeaderValue, IF_NONE_MATCH};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};

use togglegate_core::{
    BackendError, BackendResult, ClientRegistration, FeaturesResponse, FetchOutcome, FetchRequest,
    FlagBackend, GatewayError, GatewayResult, MetricsPayload,
};

use crate::config::UpstreamConfig;

const APP_NAME_HEADER: &str = "UNLEASH-APPNAME";
const INSTANCE_ID_HEADER: &str = "UNLEASH-INSTANCEID";
const CONNECTION_ID_HEADER: &str = "UNLEASH-CONNECTION-ID";
const USER_AGENT: &str = concat!("togglegate/", env!("CARGO_PKG_VERSION"));

/// Configuration for the HTTP backend
#[derive(Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the API, without trailing slash
    pub url: String,

    /// Token sent verbatim in `Authorization`
    pub api_token: Option<SecretString>,

    /// Project filter for definitions
    pub project_name: Option<String>,

    /// Name prefix filter for definitions
    pub name_prefix: Option<String>,

    /// `type:value` tag filters for definitions
    pub tags: Vec<String>,

    /// Extra headers for every request
    pub custom_headers: Vec<(String, String)>,

    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for HttpBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackendConfig")
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("project_name", &self.project_name)
            .field("name_prefix", &self.name_prefix)
            .field("tags", &self.tags)
            .field(
                "custom_headers",
                &self.custom_headers.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl From<&UpstreamConfig> for HttpBackendConfig {
    fn from(upstream: &UpstreamConfig) -> Self {
        Self {
            url: upstream.url.trim_end_matches('/').to_string(),
            api_token: upstream.api_token.clone(),
            project_name: upstream.project_name.clone(),
            name_prefix: upstream.name_prefix.clone(),
            tags: upstream.tags.clone(),
            custom_headers: upstream
                .custom_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: Duration::from_millis(upstream.timeout_ms),
        }
    }
}

/// reqwest implementation of [`FlagBackend`]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    project_name: Option<String>,
    name_prefix: Option<String>,
    tags: Vec<String>,
    timeout: Duration,
    connection_id: String,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("client", &"<reqwest::Client>")
            .field("url", &self.url)
            .field("project_name", &self.project_name)
            .field("name_prefix", &self.name_prefix)
            .field("tags", &self.tags)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Create a new HTTP backend
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if a header value is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: HttpBackendConfig) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let mut value = HeaderValue::from_str(token.expose_secret()).map_err(|_| {
                GatewayError::configuration_with_key(
                    "API token is not a valid header value",
                    "upstream.api_token",
                )
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &config.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                GatewayError::configuration_with_key(
                    format!("invalid header name '{name}': {e}"),
                    "upstream.custom_headers",
                )
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                GatewayError::configuration_with_key(
                    format!("invalid value for header '{name}': {e}"),
                    "upstream.custom_headers",
                )
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                GatewayError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        debug!("Created HTTP backend for URL: {}", config.url);

        Ok(Self {
            client,
            url: config.url,
            project_name: config.project_name,
            name_prefix: config.name_prefix,
            tags: config.tags,
            timeout: config.timeout,
            connection_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Create a backend from the upstream section of the gateway configuration
    ///
    /// # Errors
    ///
    /// See [`HttpBackend::new`].
    pub fn from_upstream(upstream: &UpstreamConfig) -> GatewayResult<Self> {
        Self::new(HttpBackendConfig::from(upstream))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.url)
    }

    fn identify(
        &self,
        request: reqwest::RequestBuilder,
        app_name: &str,
        instance_id: &str,
    ) -> reqwest::RequestBuilder {
        request
            .header(APP_NAME_HEADER, app_name)
            .header(INSTANCE_ID_HEADER, instance_id)
            .header(CONNECTION_ID_HEADER, &self.connection_id)
    }

    async fn post_json<T: serde::Serialize + Sync>(
        &self,
        path: &str,
        app_name: &str,
        instance_id: &str,
        body: &T,
    ) -> BackendResult<()> {
        let response = self
            .identify(self.client.post(self.endpoint(path)), app_name, instance_id)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(BackendError::status(status.as_u16(), body));
        }
        Ok(())
    }
}

#[async_trait]
impl FlagBackend for HttpBackend {
    async fn fetch_definitions(&self, request: &FetchRequest) -> BackendResult<FetchOutcome> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(project) = &self.project_name {
            query.push(("project", project.as_str()));
        }
        if let Some(prefix) = &self.name_prefix {
            query.push(("namePrefix", prefix.as_str()));
        }
        for tag in &self.tags {
            query.push(("tag", tag.as_str()));
        }
        if let Some(environment) = &request.environment {
            query.push(("environment", environment.as_str()));
        }

        let mut builder = self
            .identify(
                self.client.get(self.endpoint("/client/features")),
                &request.app_name,
                &request.instance_id,
            )
            .query(&query);
        if let Some(etag) = &request.etag {
            builder = builder.header(IF_NONE_MATCH, etag);
        }

        trace!(app_name = %request.app_name, etag = ?request.etag, "Fetching definitions");
        let response = builder.send().await.map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(BackendError::status(status.as_u16(), body));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| transport_error(e, self.timeout))?;
        let features: FeaturesResponse = serde_json::from_slice(&bytes)?;

        Ok(FetchOutcome::Modified {
            definitions: features.features,
            etag,
        })
    }

    async fn register_client(&self, registration: &ClientRegistration) -> BackendResult<()> {
        self.post_json(
            "/client/register",
            &registration.app_name,
            &registration.instance_id,
            registration,
        )
        .await
    }

    async fn send_metrics(&self, payload: &MetricsPayload) -> BackendResult<()> {
        self.post_json(
            "/client/metrics",
            &payload.app_name,
            &payload.instance_id,
            payload,
        )
        .await
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout {
            operation: err
                .url()
                .map_or_else(|| "http request".to_string(), |url| url.path().to_string()),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if err.is_decode() {
        BackendError::decode(err.to_string())
    } else {
        BackendError::transport(err.to_string())
    }
}
