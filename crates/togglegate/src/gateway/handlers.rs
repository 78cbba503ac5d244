//! HTTP routes of the gateway

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use togglegate_core::{Context, GatewayError, ToggleResult};
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::GatewayState;
use super::auth::Access;
use super::error::ApiError;
use super::request::{
    APP_NAME_REQUIRED, MetricsReport, ToggleQuery, context_from_body, context_from_query,
    require_app_name,
};

type Params = Query<Vec<(String, String)>>;
type ApiResult = Result<Response, ApiError>;

const TOGGLE_CACHE_CONTROL: &str = "public, max-age=2";
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Serialize)]
struct TogglesBody {
    toggles: Vec<ToggleResult>,
}

/// Which evaluation a toggle endpoint performs
#[derive(Clone, Copy)]
enum Selection {
    Enabled,
    All,
}

pub(crate) fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/proxy", get(get_enabled).post(post_enabled))
        .route("/proxy/all", get(get_all).post(post_all))
        .route("/client/features", get(client_features))
        .route("/client/metrics", post(client_metrics))
        .route("/client/register", post(client_register))
        .route("/health", get(health))
        .route("/internal-backstage/prometheus", get(prometheus))
        .layer(middleware::from_fn_with_state(state.clone(), require_ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_ready(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.is_ready() {
        next.run(request).await
    } else {
        ApiError(GatewayError::not_ready("gateway is not ready")).into_response()
    }
}

fn toggles_response(toggles: Vec<ToggleResult>) -> Response {
    (
        [(CACHE_CONTROL, TOGGLE_CACHE_CONTROL)],
        Json(TogglesBody { toggles }),
    )
        .into_response()
}

fn app_name_of(context: &Context) -> Result<String, GatewayError> {
    context
        .app_name()
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::invalid_request(APP_NAME_REQUIRED))
}

fn body_of<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| GatewayError::invalid_request(rejection.body_text()))
}

async fn evaluate(
    state: &GatewayState,
    context: Context,
    names: &[String],
    selection: Selection,
) -> ApiResult {
    let app_name = app_name_of(&context)?;
    let context = state.enrichment.enrich(context).await?;
    let client = state.pool.resolve(&app_name).await?;

    let toggles = match (names.is_empty(), selection) {
        (false, _) => client.get_defined_toggles(names, &context),
        (true, Selection::Enabled) => client.get_enabled_toggles(&context),
        (true, Selection::All) => client.get_all_toggles(&context),
    };
    state.counters.inc_requests();
    Ok(toggles_response(toggles))
}

async fn get_enabled(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(params): Params,
) -> ApiResult {
    state.authorize(&headers, Access::ClientKey)?;
    let context = context_from_query(&params, &headers);
    evaluate(&state, context, &[], Selection::Enabled).await
}

async fn post_enabled(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    payload: Result<Json<ToggleQuery>, JsonRejection>,
) -> ApiResult {
    state.authorize(&headers, Access::ClientKey)?;
    let query = body_of(payload)?;
    require_app_name(query.app_name.as_ref().or(query.context.get("appName")))?;
    let context = context_from_body(&query, &headers);
    evaluate(&state, context, &query.toggles, Selection::Enabled).await
}

async fn get_all(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(params): Params,
) -> ApiResult {
    state.authorize(&headers, Access::ClientKey)?;
    state.ensure_all_endpoint()?;
    let context = context_from_query(&params, &headers);
    evaluate(&state, context, &[], Selection::All).await
}

async fn post_all(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    payload: Result<Json<ToggleQuery>, JsonRejection>,
) -> ApiResult {
    state.authorize(&headers, Access::ClientKey)?;
    state.ensure_all_endpoint()?;
    let query = body_of(payload)?;
    require_app_name(query.app_name.as_ref().or(query.context.get("appName")))?;
    let context = context_from_body(&query, &headers);
    evaluate(&state, context, &query.toggles, Selection::All).await
}

async fn client_features(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(params): Params,
) -> ApiResult {
    state.authorize(&headers, Access::ServerToken)?;
    let app_name = params
        .iter()
        .find(|(key, value)| key == "appName" && !value.trim().is_empty())
        .map(|(_, value)| value.clone())
        .ok_or_else(|| GatewayError::invalid_request(APP_NAME_REQUIRED))?;

    let client = state
        .pool
        .get(&app_name)
        .ok_or_else(|| GatewayError::unknown_tenant(&app_name))?;

    Ok((
        [(CACHE_CONTROL, TOGGLE_CACHE_CONTROL)],
        Json(client.feature_definitions()),
    )
        .into_response())
}

async fn client_metrics(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    payload: Result<Json<MetricsReport>, JsonRejection>,
) -> ApiResult {
    state.authorize(&headers, Access::Any)?;
    let report = body_of(payload)?;
    let app_name = require_app_name(report.app_name.as_ref())?;

    let client = state
        .pool
        .get(&app_name)
        .ok_or_else(|| GatewayError::unknown_tenant(&app_name))?;

    debug!(
        app_name = %app_name,
        instance_id = report.instance_id.as_deref().unwrap_or("unknown"),
        toggles = report.bucket.toggles.len(),
        "Metrics reported"
    );
    client.register_metrics(&report.bucket.toggles);
    Ok(StatusCode::OK.into_response())
}

async fn client_register(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> ApiResult {
    state.authorize(&headers, Access::Any)?;
    debug!("Client registration acknowledged, not forwarded");
    Ok(StatusCode::OK.into_response())
}

async fn health() -> &'static str {
    "ok"
}

async fn prometheus(State(state): State<Arc<GatewayState>>) -> Response {
    let body = state.counters.render(state.pool.stats());
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response()
}
