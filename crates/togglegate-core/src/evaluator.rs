//! Toggle evaluation
//!
//! The pool and tenant machinery only depend on [`ToggleEvaluator`]. The
//! bundled [`StrategyEvaluator`] covers the common activation strategies so the
//! gateway is usable out of the box; anything richer plugs in through the trait.

use crate::context::Context;
use crate::toggle::{Evaluation, ToggleDefinition, Variant, VariantDefinition};

/// Evaluates one toggle definition against one context
///
/// Implementations must be pure with respect to the definition and context:
/// evaluation runs on the request path against an in-memory snapshot.
pub trait ToggleEvaluator: Send + Sync + std::fmt::Debug {
    fn evaluate(&self, definition: &ToggleDefinition, context: &Context) -> Evaluation;

    /// Strategy names announced to the backend on client registration
    fn supported_strategies(&self) -> Vec<String> {
        Vec::new()
    }
}

const BUILTIN_STRATEGIES: [&str; 3] = ["default", "userWithId", "remoteAddress"];

/// Default evaluator supporting `default`, `userWithId` and `remoteAddress`
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyEvaluator;

impl StrategyEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn strategy_matches(strategy: &crate::toggle::Strategy, context: &Context) -> bool {
        match strategy.name.as_str() {
            "default" => true,
            "userWithId" => list_contains(
                strategy.parameters.get("userIds"),
                context.user_id.as_deref(),
            ),
            "remoteAddress" => list_contains(
                strategy.parameters.get("IPs"),
                context.remote_address.as_deref(),
            ),
            _ => false,
        }
    }

    fn select_variant(definition: &ToggleDefinition, context: &Context) -> Variant {
        let total: u64 = definition.variants.iter().map(|v| u64::from(v.weight)).sum();
        if total == 0 {
            return Variant::disabled();
        }

        let random_seed;
        let seed = match context.stickiness_key() {
            Some(key) => key,
            None => {
                random_seed = uuid::Uuid::new_v4().to_string();
                random_seed.as_str()
            }
        };

        let target = normalized_hash(&definition.name, seed, total);
        pick_by_weight(&definition.variants, target).map_or_else(Variant::disabled, |v| Variant {
            name: v.name.clone(),
            enabled: true,
            payload: v.payload.clone(),
        })
    }
}

impl ToggleEvaluator for StrategyEvaluator {
    fn evaluate(&self, definition: &ToggleDefinition, context: &Context) -> Evaluation {
        let enabled = definition.enabled
            && (definition.strategies.is_empty()
                || definition
                    .strategies
                    .iter()
                    .any(|s| Self::strategy_matches(s, context)));

        let variant = if enabled {
            Self::select_variant(definition, context)
        } else {
            Variant::disabled()
        };

        Evaluation { enabled, variant }
    }

    fn supported_strategies(&self) -> Vec<String> {
        BUILTIN_STRATEGIES.iter().map(ToString::to_string).collect()
    }
}

fn list_contains(list: Option<&serde_json::Value>, value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    match list {
        Some(serde_json::Value::String(list)) => list.split(',').any(|item| item.trim() == value),
        Some(serde_json::Value::Number(n)) => n.to_string() == value,
        _ => false,
    }
}

/// Map `(toggle, seed)` onto `1..=total`
fn normalized_hash(toggle: &str, seed: &str, total: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(toggle.as_bytes());
    hasher.update(b":");
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head) % total + 1
}

fn pick_by_weight(variants: &[VariantDefinition], target: u64) -> Option<&VariantDefinition> {
    let mut upper = 0u64;
    variants.iter().find(|v| {
        upper += u64::from(v.weight);
        target <= upper
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toggle::Strategy;

    #[test]
    fn test_disabled_toggle_never_enabled() {
        let def = ToggleDefinition::disabled("off");
        let eval = StrategyEvaluator.evaluate(&def, &Context::new());
        assert!(!eval.enabled);
        assert_eq!(eval.variant, Variant::disabled());
    }

    #[test]
    fn test_user_with_id() {
        let def = ToggleDefinition::enabled("beta").with_strategies(vec![
            Strategy::new("userWithId").with_parameter("userIds", "7, 42,99"),
        ]);

        let yes = StrategyEvaluator.evaluate(&def, &Context::new().with_user_id("42"));
        let no = StrategyEvaluator.evaluate(&def, &Context::new().with_user_id("43"));
        let anon = StrategyEvaluator.evaluate(&def, &Context::new());

        assert!(yes.enabled);
        assert!(!no.enabled);
        assert!(!anon.enabled);
    }

    #[test]
    fn test_numeric_user_id_parameter() {
        let def = ToggleDefinition::enabled("beta")
            .with_strategies(vec![Strategy::new("userWithId").with_parameter("userIds", 42)]);

        assert!(StrategyEvaluator.evaluate(&def, &Context::new().with_user_id("42")).enabled);
        assert!(!StrategyEvaluator.evaluate(&def, &Context::new().with_user_id("4")).enabled);
    }

    #[test]
    fn test_unknown_strategy_does_not_match() {
        let def = ToggleDefinition::enabled("x")
            .with_strategies(vec![Strategy::new("gradualRolloutRandom")]);
        assert!(!StrategyEvaluator.evaluate(&def, &Context::new()).enabled);
    }

    #[test]
    fn test_no_strategies_means_on() {
        let def = ToggleDefinition::enabled("x").with_strategies(Vec::new());
        assert!(StrategyEvaluator.evaluate(&def, &Context::new()).enabled);
    }

    #[test]
    fn test_variant_is_sticky() {
        let def = ToggleDefinition::enabled("exp")
            .with_variant(VariantDefinition::new("blue", 50))
            .with_variant(VariantDefinition::new("green", 50));
        let ctx = Context::new().with_user_id("user-123");

        let first = StrategyEvaluator.evaluate(&def, &ctx).variant;
        assert!(first.is_assigned());
        for _ in 0..20 {
            assert_eq!(StrategyEvaluator.evaluate(&def, &ctx).variant, first);
        }
    }

    #[test]
    fn test_zero_weight_variant_never_chosen() {
        let def = ToggleDefinition::enabled("exp")
            .with_variant(VariantDefinition::new("never", 0))
            .with_variant(VariantDefinition::new("always", 100));
        for user in 0..50 {
            let ctx = Context::new().with_user_id(user.to_string());
            assert_eq!(StrategyEvaluator.evaluate(&def, &ctx).variant.name, "always");
        }
    }
}
