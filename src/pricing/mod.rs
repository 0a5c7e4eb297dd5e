//! Pricing tables and cost estimation.
//!
//! Credit prices and USD rates are declared in the `[pricing]` config
//! section. Everything here is a pure function of its inputs so ledger
//! amounts stay reproducible for audits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{ChatMode, ModelTier, Operation};

/// USD per 1M tokens for a text model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TextRate {
    pub input: f64,
    pub output: f64,
}

/// Credit price table for one plan, keyed `"operation:mode:tier"`.
/// Supports wildcards: `"chat:*:stable"`, `"image:*:*"`. The most
/// specific matching key wins.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(transparent)]
pub struct PlanPricing {
    pub credits: HashMap<String, f64>,
}

/// Pricing configuration: plan-priced credit tables plus USD rate
/// tables used for budget accounting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Credit prices per plan. The `default` plan is the fallback for
    /// unknown plan ids.
    #[serde(default = "default_plans")]
    pub plans: HashMap<String, PlanPricing>,

    /// USD per 1M tokens by text model id.
    #[serde(default = "default_text_rates")]
    pub text_rates: HashMap<String, TextRate>,

    /// Rate applied to text models missing from `text_rates`.
    #[serde(default = "default_text_rate")]
    pub default_text_rate: TextRate,

    /// Flat USD cost per generated image by model id.
    #[serde(default = "default_image_flat_usd")]
    pub image_flat_usd: HashMap<String, f64>,

    /// Flat cost for image models missing from `image_flat_usd`.
    #[serde(default = "default_image_usd")]
    pub default_image_usd: f64,

    /// Minimum charged for high-quality image generations regardless of
    /// the per-model flat cost.
    #[serde(default = "default_high_quality_floor")]
    pub high_quality_floor_usd: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            plans: default_plans(),
            text_rates: default_text_rates(),
            default_text_rate: default_text_rate(),
            image_flat_usd: default_image_flat_usd(),
            default_image_usd: default_image_usd(),
            high_quality_floor_usd: default_high_quality_floor(),
        }
    }
}

fn default_plans() -> HashMap<String, PlanPricing> {
    let mut credits = HashMap::new();
    credits.insert("chat:*:stable".to_string(), 1.0);
    credits.insert("chat:*:deep_dive".to_string(), 3.0);
    credits.insert("image:*:standard".to_string(), 5.0);
    credits.insert("image:*:high_quality".to_string(), 8.0);

    let mut plans = HashMap::new();
    plans.insert(DEFAULT_PLAN_ID.to_string(), PlanPricing { credits });
    plans
}

fn default_text_rates() -> HashMap<String, TextRate> {
    let mut rates = HashMap::new();
    rates.insert(
        "gemini-2.5-flash".to_string(),
        TextRate {
            input: 0.3,
            output: 2.5,
        },
    );
    rates.insert(
        "gemini-2.5-pro".to_string(),
        TextRate {
            input: 3.5,
            output: 10.0,
        },
    );
    rates
}

fn default_text_rate() -> TextRate {
    TextRate {
        input: 0.5,
        output: 2.5,
    }
}

fn default_image_flat_usd() -> HashMap<String, f64> {
    let mut flat = HashMap::new();
    flat.insert(
        "gemini-2.0-flash-preview-image-generation".to_string(),
        0.04,
    );
    flat
}

fn default_image_usd() -> f64 {
    0.05
}

fn default_high_quality_floor() -> f64 {
    0.08
}

/// Plan id used when a request does not resolve to a specific plan.
pub const DEFAULT_PLAN_ID: &str = "default";

impl PricingConfig {
    /// Integer credit price for an operation. Fractional configuration
    /// values round half-up; the result is never negative. Unmapped
    /// combinations price at zero credits.
    pub fn price_credits(
        &self,
        operation: Operation,
        mode: ChatMode,
        tier: ModelTier,
        plan_id: &str,
    ) -> i64 {
        let plan = self
            .plans
            .get(plan_id)
            .or_else(|| self.plans.get(DEFAULT_PLAN_ID));
        let Some(plan) = plan else {
            return 0;
        };

        let op = operation.as_str();
        let mode = mode.as_str();
        let tier = tier.as_str();
        let keys = [
            format!("{op}:{mode}:{tier}"),
            format!("{op}:*:{tier}"),
            format!("{op}:{mode}:*"),
            format!("{op}:*:*"),
        ];

        for key in &keys {
            if let Some(value) = plan.credits.get(key) {
                return value.round().max(0.0) as i64;
            }
        }
        0
    }

    /// USD estimate for a text generation, rounded to 6 decimal places.
    pub fn estimate_text_usd(&self, model: &str, tokens_in: i64, tokens_out: i64) -> f64 {
        let rate = self
            .text_rates
            .get(model)
            .copied()
            .unwrap_or(self.default_text_rate);
        let input_cost = (tokens_in.max(0) as f64 / 1_000_000.0) * rate.input;
        let output_cost = (tokens_out.max(0) as f64 / 1_000_000.0) * rate.output;
        round6(input_cost + output_cost)
    }

    /// USD estimate for an image generation: flat per-model cost with a
    /// floor for the high-quality tier, rounded to 6 decimal places.
    pub fn estimate_image_usd(&self, model: &str, tier: ModelTier) -> f64 {
        let flat = self
            .image_flat_usd
            .get(model)
            .copied()
            .unwrap_or(self.default_image_usd);
        if tier == ModelTier::HighQuality {
            round6(flat.max(self.high_quality_floor_usd))
        } else {
            round6(flat)
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Convert a 6-decimal USD amount to integer micro-USD for storage.
pub fn usd_to_micros(usd: f64) -> i64 {
    (usd * 1_000_000.0).round() as i64
}

/// Convert stored micro-USD back to a USD float for API responses.
pub fn micros_to_usd(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Operation::Chat, ChatMode::Mentor, ModelTier::Stable, 1)]
    #[case(Operation::Chat, ChatMode::Researcher, ModelTier::DeepDive, 3)]
    #[case(Operation::Image, ChatMode::Visionary, ModelTier::Standard, 5)]
    #[case(Operation::Image, ChatMode::Visionary, ModelTier::HighQuality, 8)]
    fn default_plan_prices(
        #[case] operation: Operation,
        #[case] mode: ChatMode,
        #[case] tier: ModelTier,
        #[case] expected: i64,
    ) {
        let pricing = PricingConfig::default();
        assert_eq!(
            pricing.price_credits(operation, mode, tier, DEFAULT_PLAN_ID),
            expected
        );
    }

    #[test]
    fn unknown_plan_falls_back_to_default() {
        let pricing = PricingConfig::default();
        assert_eq!(
            pricing.price_credits(
                Operation::Chat,
                ChatMode::Coach,
                ModelTier::Stable,
                "enterprise"
            ),
            1
        );
    }

    #[test]
    fn specific_key_beats_wildcard() {
        let mut pricing = PricingConfig::default();
        pricing
            .plans
            .get_mut(DEFAULT_PLAN_ID)
            .unwrap()
            .credits
            .insert("chat:researcher:deep_dive".to_string(), 4.0);
        assert_eq!(
            pricing.price_credits(
                Operation::Chat,
                ChatMode::Researcher,
                ModelTier::DeepDive,
                DEFAULT_PLAN_ID
            ),
            4
        );
        // Other modes still hit the wildcard row.
        assert_eq!(
            pricing.price_credits(
                Operation::Chat,
                ChatMode::Mentor,
                ModelTier::DeepDive,
                DEFAULT_PLAN_ID
            ),
            3
        );
    }

    #[test]
    fn fractional_prices_round_half_up_and_clamp() {
        let mut pricing = PricingConfig::default();
        let credits = &mut pricing.plans.get_mut(DEFAULT_PLAN_ID).unwrap().credits;
        credits.insert("chat:*:stable".to_string(), 1.5);
        credits.insert("image:*:standard".to_string(), -2.0);
        assert_eq!(
            pricing.price_credits(
                Operation::Chat,
                ChatMode::Mentor,
                ModelTier::Stable,
                DEFAULT_PLAN_ID
            ),
            2
        );
        assert_eq!(
            pricing.price_credits(
                Operation::Image,
                ChatMode::Visionary,
                ModelTier::Standard,
                DEFAULT_PLAN_ID
            ),
            0
        );
    }

    #[rstest]
    #[case("gemini-2.5-flash", 1_000_000, 1_000_000, 2.8)]
    #[case("gemini-2.5-pro", 2_000_000, 500_000, 12.0)]
    #[case("some-unknown-model", 1_000_000, 1_000_000, 3.0)]
    fn text_estimates(
        #[case] model: &str,
        #[case] tokens_in: i64,
        #[case] tokens_out: i64,
        #[case] expected: f64,
    ) {
        let pricing = PricingConfig::default();
        assert_eq!(
            pricing.estimate_text_usd(model, tokens_in, tokens_out),
            expected
        );
    }

    #[test]
    fn text_estimate_rounds_to_six_decimals() {
        let pricing = PricingConfig::default();
        // 123 input tokens at $0.30/1M = 0.0000369 -> rounds to 0.000037.
        assert_eq!(pricing.estimate_text_usd("gemini-2.5-flash", 123, 0), 0.000037);
    }

    #[test]
    fn negative_token_counts_cost_nothing() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.estimate_text_usd("gemini-2.5-flash", -5, -10), 0.0);
    }

    #[test]
    fn image_estimate_applies_high_quality_floor() {
        let pricing = PricingConfig::default();
        let standard = pricing.estimate_image_usd(
            "gemini-2.0-flash-preview-image-generation",
            ModelTier::Standard,
        );
        let high = pricing.estimate_image_usd(
            "gemini-2.0-flash-preview-image-generation",
            ModelTier::HighQuality,
        );
        assert_eq!(standard, 0.04);
        assert_eq!(high, 0.08);
        // Unmapped model uses the default flat cost.
        assert_eq!(
            pricing.estimate_image_usd("mystery-model", ModelTier::Standard),
            0.05
        );
    }

    #[test]
    fn micros_round_trip() {
        assert_eq!(usd_to_micros(2.5), 2_500_000);
        assert_eq!(usd_to_micros(0.000037), 37);
        assert_eq!(micros_to_usd(2_500_000), 2.5);
    }
}
