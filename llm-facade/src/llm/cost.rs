//! Cost computation and session-level usage accounting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::models::ModelConfig;
use super::types::{RawUsage, Usage};
use crate::error::{Error, Result};

const COST_TOLERANCE: f64 = 1e-9;

/// External source of truth for call prices.
pub trait PricingOracle: Send + Sync {
    /// Total USD cost for a call against a fully qualified model id.
    fn total_cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> Result<f64>;
}

/// Per-million token prices for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Fully qualified model identifier
    pub id: String,
    /// Input cost per million tokens (USD)
    pub input_cost_per_m: f64,
    /// Output cost per million tokens (USD)
    pub output_cost_per_m: f64,
}

impl ModelPricing {
    pub fn new(id: impl Into<String>, input_cost_per_m: f64, output_cost_per_m: f64) -> Self {
        Self {
            id: id.into(),
            input_cost_per_m,
            output_cost_per_m,
        }
    }

    /// Calculate cost for given token usage.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_m;
        input_cost + output_cost
    }
}

/// Static price table usable as a [`PricingOracle`].
#[derive(Debug, Clone, Default)]
pub struct PricingCatalog {
    entries: HashMap<String, ModelPricing>,
}

impl PricingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of widely used models, keyed by qualified id.
    pub fn well_known() -> Self {
        [
            ModelPricing::new("gpt-4", 30.0, 60.0),
            ModelPricing::new("gpt-4-turbo-preview", 10.0, 30.0),
            ModelPricing::new("gpt-3.5-turbo", 0.5, 1.5),
            ModelPricing::new("gpt-4o", 2.5, 10.0),
            ModelPricing::new("gpt-4o-mini", 0.15, 0.60),
            ModelPricing::new("claude-3-opus-20240229", 15.0, 75.0),
            ModelPricing::new("claude-3-sonnet-20240229", 3.0, 15.0),
            ModelPricing::new("claude-3-haiku-20240307", 0.25, 1.25),
            ModelPricing::new("claude-3-5-sonnet-20241022", 3.0, 15.0),
            ModelPricing::new("claude-3-5-haiku-20241022", 0.8, 4.0),
            ModelPricing::new("gemini/gemini-pro", 0.125, 0.375),
            ModelPricing::new("deepseek/deepseek-coder", 0.1, 0.2),
        ]
        .into_iter()
        .fold(Self::new(), Self::with_model)
    }

    pub fn with_model(mut self, pricing: ModelPricing) -> Self {
        self.entries.insert(pricing.id.clone(), pricing);
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.entries.get(model)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PricingOracle for PricingCatalog {
    fn total_cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> Result<f64> {
        self.get(model)
            .map(|p| p.calculate_cost(prompt_tokens, completion_tokens))
            .ok_or_else(|| Error::Pricing(format!("no pricing for model {}", model)))
    }
}

/// Compute usage and cost for one call.
///
/// Local prices come from the config's per-1K rates (zero when unknown). An
/// oracle total, when available, replaces the local total. If it differs from
/// the local total, the reported prompt and completion costs are the oracle
/// total split in the local ratio, not the raw local figures, so the three
/// still sum. Oracle failures fall back to the local computation and never
/// surface.
pub fn compute_usage(
    config: &ModelConfig,
    raw: RawUsage,
    oracle: Option<&dyn PricingOracle>,
) -> Usage {
    let model = config.qualified_name();
    let prompt_cost =
        (raw.prompt_tokens as f64 / 1000.0) * config.input_cost_per_1k.unwrap_or(0.0);
    let completion_cost =
        (raw.completion_tokens as f64 / 1000.0) * config.output_cost_per_1k.unwrap_or(0.0);
    let local_total = prompt_cost + completion_cost;

    let mut usage = Usage {
        prompt_tokens: raw.prompt_tokens,
        completion_tokens: raw.completion_tokens,
        total_tokens: raw.total(),
        prompt_cost,
        completion_cost,
        total_cost: local_total,
        model,
    };

    let Some(oracle) = oracle else {
        return usage;
    };

    match oracle.total_cost(&usage.model, raw.prompt_tokens, raw.completion_tokens) {
        Ok(total) if total.is_finite() && total >= 0.0 => {
            if (total - local_total).abs() > COST_TOLERANCE {
                let prompt_share = if local_total > 0.0 {
                    prompt_cost / local_total
                } else if raw.prompt_tokens + raw.completion_tokens > 0 {
                    raw.prompt_tokens as f64 / (raw.prompt_tokens + raw.completion_tokens) as f64
                } else {
                    1.0
                };
                usage.prompt_cost = total * prompt_share;
                usage.completion_cost = total - usage.prompt_cost;
            }
            usage.total_cost = total;
        }
        Ok(total) => {
            tracing::debug!(model = %usage.model, total, "Ignoring invalid oracle cost");
        }
        Err(e) => {
            tracing::debug!(model = %usage.model, error = %e, "Pricing oracle failed, using local prices");
        }
    }

    usage
}

/// Running totals for one client session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub input_cost: f64,
    pub output_cost: f64,
    /// Successful calls only
    pub call_count: u64,
    /// Per-model breakdown
    pub by_model: HashMap<String, ModelCosts>,
}

/// Costs for a specific model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub call_count: u64,
}

impl SessionTotals {
    /// Record usage from a successful call.
    pub fn record(&mut self, usage: &Usage) {
        self.total_tokens += usage.total_tokens;
        self.input_tokens += usage.prompt_tokens;
        self.output_tokens += usage.completion_tokens;
        self.total_cost += usage.total_cost;
        self.input_cost += usage.prompt_cost;
        self.output_cost += usage.completion_cost;
        self.call_count += 1;

        let model_costs = self.by_model.entry(usage.model.clone()).or_default();
        model_costs.input_tokens += usage.prompt_tokens;
        model_costs.output_tokens += usage.completion_tokens;
        model_costs.cost += usage.total_cost;
        model_costs.call_count += 1;
    }
}

/// Shared session accumulator; each update is a single atomic merge.
#[derive(Debug, Default)]
pub struct SessionAccumulator {
    totals: RwLock<SessionTotals>,
}

impl SessionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one successful call into the totals.
    pub async fn merge(&self, usage: &Usage) {
        self.totals.write().await.record(usage);
    }

    /// Copy of the current totals.
    pub async fn snapshot(&self) -> SessionTotals {
        self.totals.read().await.clone()
    }
}

/// Session totals plus per-call averages, rounded for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub model: String,
    pub total_calls: u64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub average_tokens_per_call: f64,
    pub average_input_tokens_per_call: f64,
    pub average_output_tokens_per_call: f64,
    pub average_cost_per_call: f64,
}

impl SessionSummary {
    pub fn from_totals(
        session_id: impl Into<String>,
        model: impl Into<String>,
        totals: &SessionTotals,
    ) -> Self {
        // Divisor floors at 1 so an empty session averages to zero.
        let calls = totals.call_count.max(1) as f64;
        Self {
            session_id: session_id.into(),
            model: model.into(),
            total_calls: totals.call_count,
            total_tokens: totals.total_tokens,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            total_cost: round_to(totals.total_cost, 4),
            input_cost: round_to(totals.input_cost, 4),
            output_cost: round_to(totals.output_cost, 4),
            average_tokens_per_call: round_to(totals.total_tokens as f64 / calls, 2),
            average_input_tokens_per_call: round_to(totals.input_tokens as f64 / calls, 2),
            average_output_tokens_per_call: round_to(totals.output_tokens as f64 / calls, 2),
            average_cost_per_call: round_to(totals.total_cost / calls, 4),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::models::Provider;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    struct FixedOracle(f64);

    impl PricingOracle for FixedOracle {
        fn total_cost(&self, _: &str, _: u64, _: u64) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct FailingOracle;

    impl PricingOracle for FailingOracle {
        fn total_cost(&self, model: &str, _: u64, _: u64) -> Result<f64> {
            Err(Error::Pricing(format!("unknown {}", model)))
        }
    }

    fn gpt4() -> ModelConfig {
        ModelConfig::preset("gpt-4").unwrap()
    }

    #[test]
    fn test_local_cost_computation() {
        let usage = compute_usage(&gpt4(), RawUsage::new(1000, 500), None);
        assert!((usage.prompt_cost - 0.03).abs() < 1e-12);
        assert!((usage.completion_cost - 0.03).abs() < 1e-12);
        assert!((usage.total_cost - 0.06).abs() < 1e-12);
        assert_eq!(usage.total_tokens, 1500);
        assert_eq!(usage.model, "gpt-4");
    }

    #[test]
    fn test_unknown_prices_cost_zero() {
        let config = ModelConfig::new("custom", Provider::OpenAI);
        let usage = compute_usage(&config, RawUsage::new(1000, 1000), None);
        assert_eq!(usage.total_cost, 0.0);
        assert_eq!(usage.total_tokens, 2000);
    }

    #[test]
    fn test_oracle_failure_falls_back() {
        let usage = compute_usage(&gpt4(), RawUsage::new(1000, 500), Some(&FailingOracle));
        assert!((usage.total_cost - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_oracle_invalid_value_falls_back() {
        let usage = compute_usage(&gpt4(), RawUsage::new(1000, 500), Some(&FixedOracle(f64::NAN)));
        assert!((usage.total_cost - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_oracle_total_preferred_and_split_consistent() {
        let usage = compute_usage(&gpt4(), RawUsage::new(1000, 500), Some(&FixedOracle(0.12)));
        assert!((usage.total_cost - 0.12).abs() < 1e-12);
        assert!((usage.prompt_cost + usage.completion_cost - usage.total_cost).abs() < 1e-9);
        // local split was 50/50
        assert!((usage.prompt_cost - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_oracle_agreeing_keeps_local_breakdown() {
        let usage = compute_usage(&gpt4(), RawUsage::new(1000, 500), Some(&FixedOracle(0.06)));
        assert!((usage.prompt_cost - 0.03).abs() < 1e-12);
        assert!((usage.completion_cost - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_oracle_with_unknown_local_prices_splits_by_tokens() {
        let config = ModelConfig::new("custom", Provider::OpenAI);
        let usage = compute_usage(&config, RawUsage::new(300, 100), Some(&FixedOracle(0.4)));
        assert!((usage.prompt_cost - 0.3).abs() < 1e-12);
        assert!((usage.completion_cost - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_catalog_oracle() {
        let catalog = PricingCatalog::well_known();
        assert!(!catalog.is_empty());
        let cost = catalog.total_cost("claude-3-5-sonnet-20241022", 1_000_000, 500_000).unwrap();
        // 1M * $3/M + 0.5M * $15/M = $10.5
        assert!((cost - 10.5).abs() < 0.01);
        assert!(catalog.total_cost("unknown", 1, 1).is_err());

        // catalog agrees with the preset for gpt-4
        let usage = compute_usage(&gpt4(), RawUsage::new(1234, 567), Some(&catalog));
        let local = compute_usage(&gpt4(), RawUsage::new(1234, 567), None);
        assert!((usage.total_cost - local.total_cost).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_accumulator_merge_and_snapshot() {
        let acc = SessionAccumulator::new();
        let a = compute_usage(&gpt4(), RawUsage::new(100, 50), None);
        let b = compute_usage(&gpt4(), RawUsage::new(200, 100), None);
        acc.merge(&a).await;
        acc.merge(&b).await;

        let totals = acc.snapshot().await;
        assert_eq!(totals.call_count, 2);
        assert_eq!(totals.total_tokens, 450);
        assert_eq!(totals.input_tokens, 300);
        assert_eq!(totals.output_tokens, 150);
        assert!((totals.total_cost - (a.total_cost + b.total_cost)).abs() < 1e-12);
        assert_eq!(totals.by_model["gpt-4"].call_count, 2);
    }

    #[test]
    fn test_summary_of_empty_session() {
        let summary = SessionSummary::from_totals("s1", "gpt-4", &SessionTotals::default());
        assert_eq!(summary.total_calls, 0);
        assert_eq!(summary.average_tokens_per_call, 0.0);
        assert_eq!(summary.average_cost_per_call, 0.0);
    }

    #[test]
    fn test_summary_rounding() {
        let totals = SessionTotals {
            total_tokens: 10,
            input_tokens: 7,
            output_tokens: 3,
            total_cost: 0.123456,
            input_cost: 0.1,
            output_cost: 0.023456,
            call_count: 3,
            by_model: HashMap::new(),
        };
        let summary = SessionSummary::from_totals("s1", "gpt-4", &totals);
        assert_eq!(summary.total_cost, 0.1235);
        assert_eq!(summary.average_tokens_per_call, 3.33);
        assert_eq!(summary.average_input_tokens_per_call, 2.33);
        assert_eq!(summary.average_cost_per_call, 0.0412);
    }

    proptest! {
        /// The cost breakdown always sums to the total.
        #[test]
        fn cost_breakdown_sums_to_total(
            prompt in 0u64..5_000_000,
            completion in 0u64..5_000_000,
            oracle_total in proptest::option::of(0.0f64..1000.0),
        ) {
            let oracle = oracle_total.map(FixedOracle);
            let usage = compute_usage(
                &gpt4(),
                RawUsage::new(prompt, completion),
                oracle.as_ref().map(|o| o as &dyn PricingOracle),
            );
            prop_assert!(
                (usage.prompt_cost + usage.completion_cost - usage.total_cost).abs() < 1e-9,
                "{} + {} != {}", usage.prompt_cost, usage.completion_cost, usage.total_cost
            );
            prop_assert_eq!(usage.total_tokens, prompt + completion);
        }
    }
}
