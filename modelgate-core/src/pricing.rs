//! Static per-model pricing and cost estimation
//!
//! Prices are USD per thousand tokens, hardcoded the same way provider
//! capabilities are. Unknown models fall back to their family's default tier;
//! models of no known family fall back to a global default. The estimator is
//! total: it never fails and never returns a negative value.

use crate::protocol::ProviderKind;

/// Input/output price per thousand tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// USD per 1000 prompt tokens
    pub input_per_thousand: f64,

    /// USD per 1000 completion tokens
    pub output_per_thousand: f64,
}

impl ModelPricing {
    const fn new(input_per_thousand: f64, output_per_thousand: f64) -> Self {
        Self {
            input_per_thousand,
            output_per_thousand,
        }
    }
}

/// Prefix-keyed pricing table; lookup takes the longest matching prefix
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    // OpenAI
    ("gpt-4o-mini", ModelPricing::new(0.000_15, 0.000_6)),
    ("gpt-4o", ModelPricing::new(0.002_5, 0.01)),
    ("gpt-4-turbo", ModelPricing::new(0.01, 0.03)),
    ("gpt-4", ModelPricing::new(0.03, 0.06)),
    ("gpt-3.5-turbo", ModelPricing::new(0.000_5, 0.001_5)),
    ("o1-mini", ModelPricing::new(0.003, 0.012)),
    ("o1", ModelPricing::new(0.015, 0.06)),
    // Anthropic
    ("claude-3-opus", ModelPricing::new(0.015, 0.075)),
    ("claude-3-5-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-haiku", ModelPricing::new(0.000_25, 0.001_25)),
    // Google
    ("gemini-1.5-pro", ModelPricing::new(0.001_25, 0.005)),
    ("gemini-1.5-flash", ModelPricing::new(0.000_075, 0.000_3)),
    ("gemini-pro", ModelPricing::new(0.000_5, 0.001_5)),
];

/// Default tier used when a model id matches no table entry
const fn default_tier(kind: Option<ProviderKind>) -> ModelPricing {
    match kind {
        Some(ProviderKind::OpenAI) => ModelPricing::new(0.002_5, 0.01),
        Some(ProviderKind::Anthropic) => ModelPricing::new(0.003, 0.015),
        Some(ProviderKind::Google) => ModelPricing::new(0.000_5, 0.001_5),
        None => ModelPricing::new(0.001, 0.002),
    }
}

/// Look up pricing for a model id
pub fn pricing_for_model(model: &str) -> ModelPricing {
    PRICING_TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, pricing)| *pricing)
        .unwrap_or_else(|| default_tier(ProviderKind::for_model(model)))
}

/// Estimate the monetary cost of a completion in USD.
///
/// Non-decreasing in both token counts for a fixed model; zero when both
/// counts are zero.
pub fn estimate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let pricing = pricing_for_model(model);
    let cost = (prompt_tokens as f64 / 1000.0) * pricing.input_per_thousand
        + (completion_tokens as f64 / 1000.0) * pricing.output_per_thousand;
    cost.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_tokens_cost_zero() {
        assert_eq!(estimate_cost("gpt-4", 0, 0), 0.0);
        assert_eq!(estimate_cost("totally-unknown", 0, 0), 0.0);
    }

    #[test]
    fn test_known_model_pricing() {
        // gpt-4: 0.03 in, 0.06 out per 1k
        let cost = estimate_cost("gpt-4", 1000, 1000);
        assert!((cost - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_longest_prefix_wins() {
        // gpt-4o-mini must not pick up the gpt-4 tier
        let mini = pricing_for_model("gpt-4o-mini-2024-07-18");
        assert_eq!(mini.input_per_thousand, 0.000_15);

        let turbo = pricing_for_model("gpt-4-turbo-preview");
        assert_eq!(turbo.input_per_thousand, 0.01);
    }

    #[test]
    fn test_unknown_model_falls_back_to_family_tier() {
        let pricing = pricing_for_model("claude-9-hyperion");
        assert_eq!(pricing, default_tier(Some(ProviderKind::Anthropic)));

        let pricing = pricing_for_model("mystery-model");
        assert_eq!(pricing, default_tier(None));
    }

    #[test]
    fn test_cost_is_monotonic() {
        let base = estimate_cost("gemini-pro", 100, 100);
        assert!(estimate_cost("gemini-pro", 200, 100) >= base);
        assert!(estimate_cost("gemini-pro", 100, 200) >= base);
        assert!(base >= 0.0);
    }
}
