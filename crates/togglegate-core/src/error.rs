//! Error types for togglegate
//!
//! Two tiers:
//! - Backend: failures of a single upstream call (transport, status, decoding)
//! - Gateway: what a caller of the pool, a tenant client or the HTTP front sees
//!
//! `GatewayError` is `Clone` because the result of one cold tenant build is
//! handed to every caller waiting on that build.

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Result type for a single upstream call
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Failure of one call against the flag-management backend
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// Connection refused, DNS failure, TLS failure and similar
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("HTTP error {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend answered with a body we could not decode
    #[error("Decode error: {0}")]
    Decode(String),

    /// Call exceeded its deadline
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl BackendError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a status error
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Check if retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Main error type for the gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    /// Missing or invalid caller token
    #[error("Unauthorized")]
    Unauthorized,

    /// Gateway or tenant is not warm yet (or is draining)
    #[error("Not ready: {message}")]
    NotReady { message: String },

    /// Upstream build, refresh or flush failed
    #[error("Backend unavailable: {message}")]
    BackendUnavailable {
        message: String,
        app_name: Option<String>,
    },

    /// No live tenant for an endpoint that never builds one
    #[error("Client for app name {app_name} not found")]
    UnknownTenant { app_name: String },

    /// Endpoint exists but is switched off by configuration
    #[error("Feature disabled: {feature}")]
    FeatureDisabled { feature: String },

    /// An enricher rejected the context; the request is aborted
    #[error("Context enrichment failed: {message}")]
    EnrichmentFailure {
        message: String,
        enricher: Option<String>,
    },

    /// Malformed caller input (missing required field and similar)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Operation exceeded its deadline
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Invalid gateway configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },
}

impl GatewayError {
    /// Create a not-ready error
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    /// Create a backend-unavailable error
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            app_name: None,
        }
    }

    /// Create a backend-unavailable error for a specific tenant
    pub fn backend_unavailable_for(message: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            app_name: Some(app_name.into()),
        }
    }

    /// Create an unknown-tenant error
    pub fn unknown_tenant(app_name: impl Into<String>) -> Self {
        Self::UnknownTenant {
            app_name: app_name.into(),
        }
    }

    /// Create a feature-disabled error
    pub fn feature_disabled(feature: impl Into<String>) -> Self {
        Self::FeatureDisabled {
            feature: feature.into(),
        }
    }

    /// Create an enrichment failure
    pub fn enrichment(message: impl Into<String>) -> Self {
        Self::EnrichmentFailure {
            message: message.into(),
            enricher: None,
        }
    }

    /// Create an enrichment failure naming the enricher
    pub fn enrichment_in(message: impl Into<String>, enricher: impl Into<String>) -> Self {
        Self::EnrichmentFailure {
            message: message.into(),
            enricher: Some(enricher.into()),
        }
    }

    /// Create an invalid-request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Short machine-readable kind, used as the `error` field of HTTP bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotReady { .. } => "not_ready",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::UnknownTenant { .. } => "unknown_tenant",
            Self::FeatureDisabled { .. } => "feature_disabled",
            Self::EnrichmentFailure { .. } => "enrichment_failure",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Timeout { .. } => "timeout",
            Self::Configuration { .. } => "configuration",
        }
    }

    /// Sanitize error message for client responses
    ///
    /// Removes upstream details (URLs, response bodies) that callers must not see.
    pub fn sanitize(&self) -> String {
        match self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::NotReady { .. } => {
                "The gateway is not ready to serve requests yet.".to_string()
            }
            Self::BackendUnavailable { .. } => "Flag backend unavailable".to_string(),
            Self::UnknownTenant { app_name } => {
                format!("Client for app name {app_name} not found")
            }
            Self::FeatureDisabled { feature } => format!(
                "The {feature} endpoint is disabled. Please check your server configuration."
            ),
            Self::EnrichmentFailure { .. } => "Context enrichment failed".to_string(),
            Self::InvalidRequest { message } => message.clone(),
            Self::Timeout { operation, .. } => format!("Operation '{operation}' timed out"),
            Self::Configuration { .. } => "Configuration error".to_string(),
        }
    }

    /// Check if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. } | Self::BackendUnavailable { .. } | Self::Timeout { .. }
        )
    }
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout {
                operation,
                timeout_ms,
            } => Self::Timeout {
                operation,
                timeout_ms,
            },
            other => Self::backend_unavailable(other.to_string()),
        }
    }
}
