//! Gateway configuration
//!
//! Loaded from an optional file (TOML, YAML or JSON) overlaid with
//! `TOGGLEGATE_`-prefixed environment variables. Nested keys use `__`, so
//! `TOGGLEGATE_UPSTREAM__URL` sets `upstream.url`. `TOGGLEGATE_CLIENT_KEYS`,
//! `TOGGLEGATE_SERVER_SIDE_TOKENS` and `TOGGLEGATE_UPSTREAM__TAGS` take comma
//! separated lists.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use togglegate_core::{GatewayError, TenantConfig};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TOGGLEGATE";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A value was read but is not acceptable
    #[error("Invalid configuration for '{key}': {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { key, message } => {
                GatewayError::configuration_with_key(message, key)
            }
            other => GatewayError::configuration(other.to_string()),
        }
    }
}

/// Connection to the flag-management backend
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the backend API, e.g. `https://flags.example.com/api`
    pub url: String,

    /// Token sent in the `Authorization` header
    #[serde(deserialize_with = "deserialize_optional_secret")]
    pub api_token: Option<SecretString>,

    /// Instance id reported to the backend
    pub instance_id: String,

    pub environment: Option<String>,
    pub project_name: Option<String>,
    pub name_prefix: Option<String>,

    /// Definition filters in `type:value` form, sent as repeated `tag` query parameters
    pub tags: Vec<String>,

    /// Extra headers sent with every backend call
    pub custom_headers: HashMap<String, String>,

    /// Deadline of a single backend call in milliseconds
    pub timeout_ms: u64,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("instance_id", &self.instance_id)
            .field("environment", &self.environment)
            .field("project_name", &self.project_name)
            .field("name_prefix", &self.name_prefix)
            .field("tags", &self.tags)
            .field(
                "custom_headers",
                &self.custom_headers.keys().collect::<Vec<_>>(),
            )
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_token: None,
            instance_id: format!("togglegate-{}", uuid::Uuid::new_v4()),
            environment: None,
            project_name: None,
            name_prefix: None,
            tags: Vec::new(),
            custom_headers: HashMap::new(),
            timeout_ms: 10_000,
        }
    }
}

/// Context defaults applied before caller-supplied enrichers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Properties added when the caller did not provide them
    pub default_properties: BTreeMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete gateway configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Socket address the HTTP front listens on
    pub bind_address: String,

    pub upstream: UpstreamConfig,

    /// Keys accepted from front-end callers
    #[serde(deserialize_with = "deserialize_secrets")]
    pub client_keys: Vec<SecretString>,

    /// Privileged tokens accepted on `/client/*` endpoints
    #[serde(deserialize_with = "deserialize_secrets")]
    pub server_side_tokens: Vec<SecretString>,

    /// Header carrying the caller token
    pub client_keys_header_name: String,

    /// Serve `/proxy/all`
    pub enable_all_endpoint: bool,

    pub refresh_interval_ms: u64,
    pub metrics_interval_ms: u64,

    /// Upper bound of the random delay added before each metrics flush
    pub metrics_jitter_ms: u64,

    pub disable_metrics: bool,

    /// Idle time after which a tenant is evicted
    pub tenant_ttl_ms: u64,

    /// Eviction sweep period; a quarter of the TTL when unset
    pub sweep_interval_ms: Option<u64>,

    pub context: ContextConfig,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind_address", &self.bind_address)
            .field("upstream", &self.upstream)
            .field("client_keys", &format!("<{} redacted>", self.client_keys.len()))
            .field(
                "server_side_tokens",
                &format!("<{} redacted>", self.server_side_tokens.len()),
            )
            .field("client_keys_header_name", &self.client_keys_header_name)
            .field("enable_all_endpoint", &self.enable_all_endpoint)
            .field("refresh_interval_ms", &self.refresh_interval_ms)
            .field("metrics_interval_ms", &self.metrics_interval_ms)
            .field("metrics_jitter_ms", &self.metrics_jitter_ms)
            .field("disable_metrics", &self.disable_metrics)
            .field("tenant_ttl_ms", &self.tenant_ttl_ms)
            .field("sweep_interval_ms", &self.sweep_interval())
            .field("context", &self.context)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            upstream: UpstreamConfig::default(),
            client_keys: Vec::new(),
            server_side_tokens: Vec::new(),
            client_keys_header_name: "authorization".to_string(),
            enable_all_endpoint: false,
            refresh_interval_ms: 5_000,
            metrics_interval_ms: 30_000,
            metrics_jitter_ms: 0,
            disable_metrics: false,
            tenant_ttl_ms: 3_600_000,
            sweep_interval_ms: None,
            context: ContextConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables only
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` if a variable cannot be deserialized.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// Environment variables with the `TOGGLEGATE_` prefix override file settings.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use togglegate::GatewayConfig;
    ///
    /// let config = GatewayConfig::from_file("togglegate.toml").expect("Failed to load config");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid configuration
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(Some(path.as_ref()))
    }

    /// Load from an optional file plus the environment
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_file`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_file`].
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }

            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("yaml" | "yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(ConfigError::UnsupportedFormat),
            };

            let name = path.to_str().ok_or(ConfigError::UnsupportedFormat)?;
            builder = builder.add_source(File::new(name, format));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("client_keys")
                    .with_list_parse_key("server_side_tokens")
                    .with_list_parse_key("upstream.tags")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create a configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::new()
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.trim().is_empty() {
            return Err(ConfigError::invalid("upstream.url", "must be set"));
        }
        let url = url::Url::parse(&self.upstream.url)
            .map_err(|e| ConfigError::invalid("upstream.url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "upstream.url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        if self.client_keys.is_empty() {
            return Err(ConfigError::invalid(
                "client_keys",
                "at least one client key is required",
            ));
        }

        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid(
                "bind_address",
                format!("'{}' is not a socket address", self.bind_address),
            ));
        }

        if self.client_keys_header_name.trim().is_empty()
            || http::HeaderName::from_bytes(self.client_keys_header_name.as_bytes()).is_err()
        {
            return Err(ConfigError::invalid(
                "client_keys_header_name",
                "must be a valid header name",
            ));
        }

        if let Some(tag) = self.upstream.tags.iter().find(|t| !is_tag(t)) {
            return Err(ConfigError::invalid(
                "upstream.tags",
                format!("'{tag}' is not in type:value form"),
            ));
        }

        for (key, value) in [
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("metrics_interval_ms", self.metrics_interval_ms),
            ("tenant_ttl_ms", self.tenant_ttl_ms),
            ("upstream.timeout_ms", self.upstream.timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }

        if self.metrics_jitter_ms >= self.metrics_interval_ms {
            return Err(ConfigError::invalid(
                "metrics_jitter_ms",
                "must be less than metrics_interval_ms",
            ));
        }

        match self.sweep_interval_ms {
            Some(0) => Err(ConfigError::invalid(
                "sweep_interval_ms",
                "must be greater than zero",
            )),
            Some(sweep) if sweep > self.tenant_ttl_ms => Err(ConfigError::invalid(
                "sweep_interval_ms",
                "must not exceed tenant_ttl_ms",
            )),
            _ => Ok(()),
        }
    }

    /// Effective eviction sweep period
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval_ms.map_or_else(
            || Duration::from_millis((self.tenant_ttl_ms / 4).max(1)),
            Duration::from_millis,
        )
    }

    /// Settings handed to every tenant client
    pub fn tenant_config(&self) -> TenantConfig {
        TenantConfig {
            instance_id: self.upstream.instance_id.clone(),
            environment: self.upstream.environment.clone(),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            metrics_interval: Duration::from_millis(self.metrics_interval_ms),
            metrics_jitter: Duration::from_millis(self.metrics_jitter_ms),
            backend_timeout: Duration::from_millis(self.upstream.timeout_ms),
            disable_metrics: self.disable_metrics,
            ttl: Duration::from_millis(self.tenant_ttl_ms),
            sweep_interval: self.sweep_interval(),
        }
    }
}

/// Builder for [`GatewayConfig`]
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address
    #[must_use]
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.bind_address = address.into();
        self
    }

    /// Set the backend base URL
    #[must_use]
    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream.url = url.into();
        self
    }

    /// Set the backend API token
    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.upstream.api_token = Some(SecretString::from(token.into()));
        self
    }

    /// Set the instance id reported upstream
    #[must_use]
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.config.upstream.instance_id = instance_id.into();
        self
    }

    /// Set the backend environment
    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.upstream.environment = Some(environment.into());
        self
    }

    /// Add a client key
    #[must_use]
    pub fn client_key(mut self, key: impl Into<String>) -> Self {
        self.config.client_keys.push(SecretString::from(key.into()));
        self
    }

    /// Add a server-side token
    #[must_use]
    pub fn server_side_token(mut self, token: impl Into<String>) -> Self {
        self.config
            .server_side_tokens
            .push(SecretString::from(token.into()));
        self
    }

    /// Set the header carrying caller tokens
    #[must_use]
    pub fn client_keys_header_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_keys_header_name = name.into();
        self
    }

    /// Serve `/proxy/all`
    #[must_use]
    pub const fn enable_all_endpoint(mut self, enabled: bool) -> Self {
        self.config.enable_all_endpoint = enabled;
        self
    }

    /// Set the definitions refresh period
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.config.refresh_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the metrics flush period
    #[must_use]
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the upper bound of the random delay before each metrics flush
    #[must_use]
    pub fn metrics_jitter(mut self, jitter: Duration) -> Self {
        self.config.metrics_jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Add a `type:value` definitions filter
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.config.upstream.tags.push(tag.into());
        self
    }

    /// Disable usage metrics and client registration
    #[must_use]
    pub const fn disable_metrics(mut self, disabled: bool) -> Self {
        self.config.disable_metrics = disabled;
        self
    }

    /// Set the idle TTL of tenants
    #[must_use]
    pub fn tenant_ttl(mut self, ttl: Duration) -> Self {
        self.config.tenant_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set the backend call deadline
    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Add a default context property
    #[must_use]
    pub fn default_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .context
            .default_properties
            .insert(key.into(), value.into());
        self
    }

    /// Set the log level
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

fn is_tag(tag: &str) -> bool {
    matches!(tag.split_once(':'), Some((kind, value)) if !kind.is_empty() && !value.is_empty())
}

fn deserialize_secrets<'de, D>(deserializer: D) -> Result<Vec<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(SecretString::from)
        .collect())
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}
