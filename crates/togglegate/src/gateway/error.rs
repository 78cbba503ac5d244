//! HTTP mapping of gateway errors

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;
use togglegate_core::GatewayError;
use tracing::{debug, error, warn};

/// Response wrapper for [`GatewayError`]
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

/// Status code returned for an error
pub fn status_of(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
        GatewayError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        GatewayError::UnknownTenant { .. } => StatusCode::NOT_FOUND,
        GatewayError::FeatureDisabled { .. } => StatusCode::NOT_IMPLEMENTED,
        GatewayError::NotReady { .. }
        | GatewayError::BackendUnavailable { .. }
        | GatewayError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                debug!(error = %self.0, "Request rejected");
            }
            StatusCode::INTERNAL_SERVER_ERROR => error!(error = %self.0, "Request failed"),
            _ => warn!(error = %self.0, "Request failed"),
        }

        (
            status,
            Json(json!({
                "error": self.0.kind(),
                "message": self.0.sanitize(),
            })),
        )
            .into_response()
    }
}
