//! Rule-based dimension scorers.
//!
//! Every scorer decomposes its dimension into named sub-checks, records each
//! sub-score with a fixed weight, and lets [`ScoreCard`] combine them. The
//! weights of one scorer always sum to 1.0, so the overall score is the weighted
//! sum of the sub-scores.

pub mod completeness;
pub mod compliance;
pub mod cost;
pub mod faithfulness;
pub mod qos;
pub mod reasoning;

pub use completeness::CompletenessScorer;
pub use compliance::ComplianceScorer;
pub use cost::CostScorer;
pub use faithfulness::FaithfulnessScorer;
pub use qos::QosScorer;
pub use reasoning::ReasoningQualityScorer;

use std::collections::BTreeMap;

use crate::error::ScorerError;
use crate::types::{Dimension, DimensionScore, EvaluationRequest};

/// Trait for scorers that rate one dimension of a narrative.
pub trait DimensionScorer: Send + Sync {
    /// The dimension this scorer produces.
    fn dimension(&self) -> Dimension;

    /// Whether the scorer has the inputs it needs for this request.
    /// A scorer that does not apply is skipped, not failed.
    fn applies(&self, _request: &EvaluationRequest) -> bool {
        true
    }

    /// Score the request.
    fn score(&self, request: &EvaluationRequest) -> Result<DimensionScore, ScorerError>;
}

/// Result of one sub-check before weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub score: f64,
    pub violations: Vec<String>,
    pub strengths: Vec<String>,
}

impl CheckOutcome {
    /// A check that starts at 100 and loses points per finding.
    pub fn full() -> Self {
        Self::with_score(100.0)
    }

    pub fn with_score(score: f64) -> Self {
        Self {
            score,
            violations: Vec::new(),
            strengths: Vec::new(),
        }
    }

    /// Subtract `points` and record why.
    pub fn penalize(&mut self, points: f64, violation: impl Into<String>) {
        self.score -= points;
        self.violations.push(violation.into());
    }

    pub fn violation(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    pub fn strength(&mut self, strength: impl Into<String>) {
        self.strengths.push(strength.into());
    }
}

/// Covered/applicable tally for coverage-style checks.
///
/// Items whose prerequisite data is missing are never added, so they
/// neither help nor hurt the ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coverage {
    pub covered: usize,
    pub applicable: usize,
}

impl Coverage {
    pub fn record(&mut self, covered: bool) {
        self.applicable += 1;
        if covered {
            self.covered += 1;
        }
    }

    /// covered / applicable * 100; a check with nothing applicable scores 100.
    pub fn score(&self) -> f64 {
        if self.applicable == 0 {
            100.0
        } else {
            self.covered as f64 / self.applicable as f64 * 100.0
        }
    }
}

/// Accumulates weighted sub-checks into a [`DimensionScore`].
#[derive(Debug)]
pub struct ScoreCard {
    dimension: Dimension,
    sub_scores: BTreeMap<String, f64>,
    weights: BTreeMap<String, f64>,
    violations: Vec<String>,
    strengths: Vec<String>,
    details: BTreeMap<String, f64>,
}

impl ScoreCard {
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            sub_scores: BTreeMap::new(),
            weights: BTreeMap::new(),
            violations: Vec::new(),
            strengths: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    /// Record a sub-check. The score is clamped to [0, 100].
    pub fn record(&mut self, name: &str, weight: f64, outcome: CheckOutcome) {
        self.sub_scores
            .insert(name.to_string(), outcome.score.clamp(0.0, 100.0));
        self.weights.insert(name.to_string(), weight);
        self.violations.extend(outcome.violations);
        self.strengths.extend(outcome.strengths);
    }

    /// Record an unweighted measurement.
    pub fn detail(&mut self, name: &str, value: f64) {
        self.details.insert(name.to_string(), value);
    }

    pub fn finish(self) -> DimensionScore {
        let mut score = DimensionScore {
            dimension: self.dimension,
            overall: 0.0,
            sub_scores: self.sub_scores,
            weights: self.weights,
            violations: self.violations,
            strengths: self.strengths,
            details: self.details,
            failure: None,
        };
        score.overall = score.weighted_sum().clamp(0.0, 100.0);
        score
    }
}

/// Lowercased copy used for keyword matching.
pub(crate) fn lowered(text: &str) -> String {
    text.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scorecard_weighted_sum() {
        let mut card = ScoreCard::new(Dimension::Faithfulness);
        card.record("a", 0.6, CheckOutcome::with_score(50.0));
        card.record("b", 0.4, CheckOutcome::full());
        let score = card.finish();
        assert!((score.overall - 70.0).abs() < 1e-9);
        assert!((score.overall - score.weighted_sum()).abs() < 1e-9);
    }

    #[test]
    fn test_scorecard_clamps_sub_scores() {
        let mut card = ScoreCard::new(Dimension::Compliance);
        let mut outcome = CheckOutcome::full();
        outcome.penalize(80.0, "first");
        outcome.penalize(80.0, "second");
        card.record("only", 1.0, outcome);
        let score = card.finish();
        assert_eq!(score.sub_scores["only"], 0.0);
        assert_eq!(score.violations.len(), 2);
    }

    #[test]
    fn test_coverage_empty_is_full() {
        assert_eq!(Coverage::default().score(), 100.0);
        let mut c = Coverage::default();
        c.record(true);
        c.record(false);
        assert_eq!(c.score(), 50.0);
    }
}
