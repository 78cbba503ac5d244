//! Evaluation context
//!
//! A [`Context`] is built once per request and never mutated in place. Enrichers
//! take a context by value and hand back a new one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named attributes a toggle is evaluated against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Logical application the request belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,

    /// Caller-supplied evaluation time, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<String>,

    /// Arbitrary custom fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Set the user id
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the session id
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the remote address
    #[must_use]
    pub fn with_remote_address(mut self, remote_address: impl Into<String>) -> Self {
        self.remote_address = Some(remote_address.into());
        self
    }

    /// Set the environment
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Add a custom property, replacing any previous value
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Application name, if any
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// Set a well-known field or a custom property by its wire name
    ///
    /// `properties[key]` is unwrapped to `key`. Used when building a context from
    /// flat query parameters.
    pub fn set_field(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key {
            "appName" => self.app_name = Some(value),
            "environment" => self.environment = Some(value),
            "userId" => self.user_id = Some(value),
            "sessionId" => self.session_id = Some(value),
            "remoteAddress" => self.remote_address = Some(value),
            "currentTime" => self.current_time = Some(value),
            other => {
                let name = other
                    .strip_prefix("properties[")
                    .and_then(|rest| rest.strip_suffix(']'))
                    .unwrap_or(other);
                self.properties.insert(name.to_string(), value);
            }
        }
    }

    /// Value used for sticky variant assignment
    pub fn stickiness_key(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.session_id.as_deref())
            .or(self.remote_address.as_deref())
    }
}

impl<K, V> FromIterator<(K, V)> for Context
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        for (key, value) in iter {
            ctx.set_field(key.as_ref(), value);
        }
        ctx
    }
}
