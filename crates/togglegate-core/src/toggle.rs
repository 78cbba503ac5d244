//! Toggle definitions as served by the backend, and evaluated toggle results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the variant reported when a toggle has no variant for the caller
pub const DISABLED_VARIANT: &str = "disabled";

/// One flag definition from the backend snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleDefinition {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub strategies: Vec<Strategy>,

    #[serde(default)]
    pub variants: Vec<VariantDefinition>,

    #[serde(default)]
    pub impression_data: bool,

    /// Fields the gateway does not interpret (description, project, type, ...)
    /// but passes through on `/client/features`
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ToggleDefinition {
    /// Create an enabled toggle with the `default` strategy
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            strategies: vec![Strategy::new("default")],
            variants: Vec::new(),
            impression_data: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Create a disabled toggle
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::enabled(name)
        }
    }

    /// Replace the strategy list
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Add a variant
    #[must_use]
    pub fn with_variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }
}

/// Activation strategy attached to a toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,

    /// Backends send numbers as well as strings (`"rollout": 50`)
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Constraints and segments, passed through uninterpreted
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Strategy {
    /// Create a strategy without parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Weighted variant of a toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDefinition {
    pub name: String,

    #[serde(default)]
    pub weight: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl VariantDefinition {
    /// Create a variant with the given weight
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
            payload: None,
        }
    }
}

/// Opaque variant payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Variant assigned to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl Variant {
    /// The variant reported for disabled toggles and toggles without variants
    pub fn disabled() -> Self {
        Self {
            name: DISABLED_VARIANT.to_string(),
            enabled: false,
            payload: None,
        }
    }

    /// Whether a real variant was assigned
    pub fn is_assigned(&self) -> bool {
        self.enabled && self.name != DISABLED_VARIANT
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Outcome of evaluating one toggle against one context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub enabled: bool,
    pub variant: Variant,
}

/// Evaluated toggle as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResult {
    pub name: String,
    pub enabled: bool,
    pub variant: Variant,
    pub impression_data: bool,
}

/// Body of the backend's definitions endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesResponse {
    #[serde(default = "default_features_version")]
    pub version: u32,
    pub features: Vec<ToggleDefinition>,
}

fn default_features_version() -> u32 {
    2
}

impl FeaturesResponse {
    /// Wrap a definitions list at the current schema version
    pub fn new(features: Vec<ToggleDefinition>) -> Self {
        Self {
            version: default_features_version(),
            features,
        }
    }
}
