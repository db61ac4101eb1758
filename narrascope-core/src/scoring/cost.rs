//! Cost: monetary and token efficiency of the generation run.

use super::{CheckOutcome, DimensionScorer, ScoreCard};
use crate::config::CostConfig;
use crate::error::ScorerError;
use crate::types::{Dimension, DimensionScore, EvaluationRequest, GenerationTelemetry};

const W_COST_EFFICIENCY: f64 = 0.50;
const W_TOKEN_EFFICIENCY: f64 = 0.30;
const W_CALL_EFFICIENCY: f64 = 0.20;

/// (max cost / budget ratio, score)
const COST_RATIO_BANDS: &[(f64, f64)] = &[(0.5, 100.0), (1.0, 80.0), (1.5, 60.0), (2.0, 40.0)];
const OVER_BUDGET_SCORE: f64 = 20.0;
const EXTRA_CALL_PENALTY: f64 = 15.0;

/// Known model prices as (prefix, input USD per million tokens, output USD per million).
/// More specific prefixes come first.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-5-nano", 0.05, 0.40),
    ("gpt-5-mini", 0.25, 2.00),
    ("gpt-5", 1.25, 10.00),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.0),
    ("gpt-4-turbo", 10.0, 30.0),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("o4-mini", 1.10, 4.40),
    ("o3-mini", 1.10, 4.40),
    ("o3", 2.00, 8.00),
    ("claude-opus-4", 15.0, 75.0),
    ("claude-sonnet-4", 3.0, 15.0),
    ("claude-3-5-sonnet", 3.0, 15.0),
    ("claude-haiku-4-5", 1.00, 5.00),
    ("claude-3-5-haiku", 0.80, 4.0),
    ("claude-3-haiku", 0.25, 1.25),
    ("gemini-2.5-pro", 1.25, 10.0),
    ("gemini-2.5-flash-lite", 0.10, 0.40),
    ("gemini-2.5-flash", 0.30, 2.50),
    ("gemini-2.0-flash", 0.10, 0.40),
    ("deepseek-reasoner", 0.55, 2.19),
    ("deepseek-chat", 0.27, 1.10),
    ("qwen-max", 1.60, 6.40),
    ("qwen-plus", 0.40, 1.20),
    ("qwen-turbo", 0.05, 0.20),
];

/// Look up per-model pricing as `(input_cost_per_million, output_cost_per_million)`.
/// Returns `None` for unknown models; callers fall back to configured defaults.
pub fn model_pricing(model: &str) -> Option<(f64, f64)> {
    let normalized = model.to_lowercase();
    MODEL_PRICING
        .iter()
        .find(|(prefix, _, _)| normalized.starts_with(prefix))
        .map(|(_, input, output)| (*input, *output))
}

/// Scores spend against the per-call budget, scaled by the LLM calls the run made.
pub struct CostScorer {
    config: CostConfig,
}

impl CostScorer {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    /// Estimated spend in USD for the run.
    pub fn estimate_usd(&self, t: &GenerationTelemetry) -> f64 {
        let (input_price, output_price) = t
            .model
            .as_deref()
            .and_then(model_pricing)
            .unwrap_or((
                self.config.default_input_cost_per_million,
                self.config.default_output_cost_per_million,
            ));
        t.input_tokens as f64 / 1_000_000.0 * input_price
            + t.output_tokens as f64 / 1_000_000.0 * output_price
    }

    /// Spend budget for the run: the per-call budget times the LLM calls made,
    /// counting at least one call.
    pub fn run_budget_usd(&self, t: &GenerationTelemetry) -> f64 {
        self.config.budget_usd_per_call * f64::from(t.llm_calls.max(1))
    }

    fn cost_efficiency(cost: f64, budget: f64) -> (CheckOutcome, f64) {
        let ratio = cost / budget;
        let score = COST_RATIO_BANDS
            .iter()
            .find(|(limit, _)| ratio <= *limit)
            .map(|(_, score)| *score)
            .unwrap_or(OVER_BUDGET_SCORE);
        let mut out = CheckOutcome::with_score(score);
        if ratio > 1.0 {
            out.violation(format!(
                "estimated cost ${cost:.4} exceeds budget ${budget:.4}"
            ));
        } else if ratio <= 0.5 {
            out.strength(format!("estimated cost ${cost:.4} well within budget"));
        }
        (out, ratio)
    }

    fn token_efficiency(&self, t: &GenerationTelemetry) -> CheckOutcome {
        let total = t.input_tokens.saturating_add(t.output_tokens);
        let budget = self.config.token_budget;
        if total <= budget {
            return CheckOutcome::full();
        }
        let mut out = CheckOutcome::with_score(100.0 * budget as f64 / total as f64);
        out.violation(format!("{total} tokens over budget of {budget}"));
        out
    }

    fn call_efficiency(&self, t: &GenerationTelemetry) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        let extra = t.llm_calls.saturating_sub(self.config.call_budget);
        if extra > 0 {
            out.penalize(
                extra as f64 * EXTRA_CALL_PENALTY,
                format!(
                    "{} LLM calls over budget of {}",
                    t.llm_calls, self.config.call_budget
                ),
            );
        }
        out
    }
}

impl Default for CostScorer {
    fn default() -> Self {
        Self::new(CostConfig::default())
    }
}

impl DimensionScorer for CostScorer {
    fn dimension(&self) -> Dimension {
        Dimension::Cost
    }

    fn applies(&self, request: &EvaluationRequest) -> bool {
        request.telemetry.is_some()
    }

    fn score(&self, request: &EvaluationRequest) -> Result<DimensionScore, ScorerError> {
        let t = request
            .telemetry
            .as_ref()
            .ok_or_else(|| ScorerError::missing_input(Dimension::Cost, "telemetry"))?;
        if self.config.budget_usd_per_call <= 0.0 {
            return Err(ScorerError::failed(
                Dimension::Cost,
                "budget_usd_per_call must be positive",
            ));
        }

        let cost = self.estimate_usd(t);
        let budget = self.run_budget_usd(t);
        let (cost_check, ratio) = Self::cost_efficiency(cost, budget);

        let mut card = ScoreCard::new(Dimension::Cost);
        card.record("cost_efficiency", W_COST_EFFICIENCY, cost_check);
        card.record("token_efficiency", W_TOKEN_EFFICIENCY, self.token_efficiency(t));
        card.record("call_efficiency", W_CALL_EFFICIENCY, self.call_efficiency(t));
        card.detail("estimated_cost_usd", cost);
        card.detail("budget_usd", budget);
        card.detail("cost_ratio", ratio);
        card.detail(
            "total_tokens",
            t.input_tokens.saturating_add(t.output_tokens) as f64,
        );
        Ok(card.finish())
    }
}
