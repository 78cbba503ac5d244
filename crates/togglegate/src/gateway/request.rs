//! Request parsing: evaluation context and bodies

use http::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use togglegate_core::{Context, GatewayError, GatewayResult, ToggleCountsMap};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Message of the 400 answered when no usable app name was sent
pub const APP_NAME_REQUIRED: &str = "App name is required and must be a string";

/// Body of `POST /proxy` and `POST /proxy/all`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleQuery {
    #[serde(default)]
    pub app_name: Option<Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Restrict the answer to these toggle names
    #[serde(default)]
    pub toggles: Vec<String>,
}

/// Body of `POST /client/metrics`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    #[serde(default)]
    pub app_name: Option<Value>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub bucket: ReportedBucket,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportedBucket {
    #[serde(default)]
    pub toggles: ToggleCountsMap,
}

/// Pull a required, non-empty string app name out of a JSON value
pub fn require_app_name(value: Option<&Value>) -> GatewayResult<String> {
    match value {
        Some(Value::String(name)) if !name.trim().is_empty() => Ok(name.clone()),
        _ => Err(GatewayError::invalid_request(APP_NAME_REQUIRED)),
    }
}

/// Build a context from flat query parameters
pub fn context_from_query(params: &[(String, String)], headers: &HeaderMap) -> Context {
    let mut context: Context = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    apply_forwarded_for(&mut context, headers);
    context
}

/// Build a context from a JSON body
///
/// A top-level `appName` wins over one inside `context`.
pub fn context_from_body(query: &ToggleQuery, headers: &HeaderMap) -> Context {
    let mut context = Context::new();
    for (key, value) in &query.context {
        match (key.as_str(), value) {
            ("properties", Value::Object(props)) => {
                for (name, value) in props {
                    if let Some(value) = scalar(value) {
                        context.properties.insert(name.clone(), value);
                    }
                }
            }
            (key, value) => {
                if let Some(value) = scalar(value) {
                    context.set_field(key, value);
                }
            }
        }
    }
    if let Some(Value::String(app_name)) = &query.app_name {
        context.app_name = Some(app_name.clone());
    }
    apply_forwarded_for(&mut context, headers);
    context
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn apply_forwarded_for(context: &mut Context, headers: &HeaderMap) {
    if context.remote_address.is_some() {
        return;
    }
    context.remote_address = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
}
