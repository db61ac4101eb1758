//! Quality of service of the generation run, derived from its telemetry.

use super::{CheckOutcome, DimensionScorer, ScoreCard};
use crate::config::QosConfig;
use crate::error::ScorerError;
use crate::types::{Dimension, DimensionScore, EvaluationRequest, GenerationTelemetry};

const W_LATENCY: f64 = 0.30;
const W_DETERMINISM: f64 = 0.20;
const W_RELIABILITY: f64 = 0.25;
const W_RESOURCE_EFFICIENCY: f64 = 0.15;
const W_SCALABILITY: f64 = 0.10;

/// Per-stage latency ceilings in milliseconds.
const STAGE_THRESHOLDS_MS: &[(&str, u64)] = &[
    ("data_fetch", 3_000),
    ("indicator_calc", 1_000),
    ("percentile_calc", 1_000),
    ("llm_generation", 15_000),
];
const STAGE_PENALTY: f64 = 10.0;

/// Stages with no network or model in the loop; their timings should be stable.
const DETERMINISTIC_STAGES: &[&str] = &["indicator_calc", "percentile_calc", "context_build"];
const DEVIATION_LIMIT: f64 = 0.5;
const DEVIATION_PENALTY: f64 = 15.0;
const DEVIATION_PENALTY_CAP: f64 = 50.0;

const ERROR_PENALTY: f64 = 70.0;
const TIMEOUT_PENALTY: f64 = 30.0;

const DB_QUERY_PENALTY: f64 = 5.0;
const CALL_PENALTY: f64 = 10.0;
const RESOURCE_PENALTY_CAP: f64 = 40.0;

const TREND_LIMIT: f64 = 0.5;
const TREND_PENALTY: f64 = 20.0;

/// (upper bound in ms, latency score, scalability level)
const LATENCY_BANDS: &[(u64, f64, f64)] = &[
    (5_000, 100.0, 100.0),
    (10_000, 85.0, 80.0),
    (20_000, 65.0, 60.0),
];
const SLOW_LATENCY_SCORE: f64 = 40.0;
const SLOW_SCALABILITY_LEVEL: f64 = 40.0;

fn latency_band(total_ms: u64) -> (f64, f64) {
    LATENCY_BANDS
        .iter()
        .find(|(limit, _, _)| total_ms < *limit)
        .map(|(_, score, level)| (*score, *level))
        .unwrap_or((SLOW_LATENCY_SCORE, SLOW_SCALABILITY_LEVEL))
}

/// Scores latency, stability, reliability and resource use of the run.
pub struct QosScorer {
    config: QosConfig,
}

impl QosScorer {
    pub fn new(config: QosConfig) -> Self {
        Self { config }
    }

    fn latency(t: &GenerationTelemetry) -> CheckOutcome {
        let (score, _) = latency_band(t.total_latency_ms);
        let mut out = CheckOutcome::with_score(score);
        if score < 100.0 {
            out.violation(format!("total latency {}ms", t.total_latency_ms));
        } else {
            out.strength(format!("fast generation ({}ms)", t.total_latency_ms));
        }
        for (stage, limit) in STAGE_THRESHOLDS_MS {
            if let Some(ms) = t.stage_latency_ms.get(*stage)
                && ms > limit
            {
                out.penalize(
                    STAGE_PENALTY,
                    format!("{stage} took {ms}ms (limit {limit}ms)"),
                );
            }
        }
        out
    }

    fn determinism(t: &GenerationTelemetry) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        let Some(baseline) = &t.baseline else {
            return out;
        };
        let mut penalty = 0.0;
        for stage in DETERMINISTIC_STAGES {
            let (Some(actual), Some(mean)) =
                (t.stage_latency_ms.get(*stage), baseline.stage_mean_ms.get(*stage))
            else {
                continue;
            };
            if *mean <= 0.0 {
                continue;
            }
            let deviation = (*actual as f64 - mean).abs() / mean;
            if deviation > DEVIATION_LIMIT {
                penalty += DEVIATION_PENALTY;
                out.violation(format!(
                    "{stage} deviates {:.0}% from baseline {mean:.0}ms",
                    deviation * 100.0
                ));
            }
        }
        out.score -= penalty.min(DEVIATION_PENALTY_CAP);
        out
    }

    fn reliability(&self, t: &GenerationTelemetry) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        if t.errored {
            out.penalize(ERROR_PENALTY, "generation reported an error");
        }
        if t.total_latency_ms >= self.config.timeout_ms {
            out.penalize(
                TIMEOUT_PENALTY,
                format!("probable timeout ({}ms)", t.total_latency_ms),
            );
        }
        out
    }

    fn resource_efficiency(&self, t: &GenerationTelemetry) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        let extra_queries = t.db_queries.saturating_sub(self.config.db_query_budget);
        if extra_queries > 0 {
            out.penalize(
                (extra_queries as f64 * DB_QUERY_PENALTY).min(RESOURCE_PENALTY_CAP),
                format!(
                    "{} db queries over budget of {}",
                    t.db_queries, self.config.db_query_budget
                ),
            );
        }
        let calls = t.llm_calls.saturating_add(t.api_calls);
        let extra_calls = calls.saturating_sub(self.config.call_budget);
        if extra_calls > 0 {
            out.penalize(
                (extra_calls as f64 * CALL_PENALTY).min(RESOURCE_PENALTY_CAP),
                format!(
                    "{calls} external calls over budget of {}",
                    self.config.call_budget
                ),
            );
        }
        out
    }

    fn scalability(t: &GenerationTelemetry) -> CheckOutcome {
        let (_, level) = latency_band(t.total_latency_ms);
        let mut out = CheckOutcome::with_score(level);
        if let Some(baseline) = &t.baseline
            && baseline.mean_total_ms > 0.0
            && t.total_latency_ms as f64 > baseline.mean_total_ms * (1.0 + TREND_LIMIT)
        {
            out.penalize(
                TREND_PENALTY,
                format!(
                    "latency trending up: {}ms vs baseline {:.0}ms",
                    t.total_latency_ms, baseline.mean_total_ms
                ),
            );
        }
        out
    }
}

impl Default for QosScorer {
    fn default() -> Self {
        Self::new(QosConfig::default())
    }
}

impl DimensionScorer for QosScorer {
    fn dimension(&self) -> Dimension {
        Dimension::Qos
    }

    fn applies(&self, request: &EvaluationRequest) -> bool {
        request.telemetry.is_some()
    }

    fn score(&self, request: &EvaluationRequest) -> Result<DimensionScore, ScorerError> {
        let t = request
            .telemetry
            .as_ref()
            .ok_or_else(|| ScorerError::missing_input(Dimension::Qos, "telemetry"))?;

        let mut card = ScoreCard::new(Dimension::Qos);
        card.record("latency", W_LATENCY, Self::latency(t));
        card.record("determinism", W_DETERMINISM, Self::determinism(t));
        card.record("reliability", W_RELIABILITY, self.reliability(t));
        card.record(
            "resource_efficiency",
            W_RESOURCE_EFFICIENCY,
            self.resource_efficiency(t),
        );
        card.record("scalability", W_SCALABILITY, Self::scalability(t));
        card.detail("total_latency_ms", t.total_latency_ms as f64);
        card.detail("db_queries", t.db_queries as f64);
        Ok(card.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroundTruthContext, LatencyBaseline};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn request(telemetry: GenerationTelemetry) -> EvaluationRequest {
        EvaluationRequest::new(
            "narrative",
            GroundTruthContext::default(),
            "ACME",
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
        )
        .with_telemetry(telemetry)
    }

    #[test]
    fn test_fast_clean_run() {
        let score = QosScorer::default()
            .score(&request(GenerationTelemetry {
                total_latency_ms: 3_200,
                db_queries: 4,
                llm_calls: 1,
                ..Default::default()
            }))
            .unwrap();
        assert!((score.overall - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_bands_and_stage_penalty() {
        let score = QosScorer::default()
            .score(&request(GenerationTelemetry {
                total_latency_ms: 12_000,
                stage_latency_ms: BTreeMap::from([("llm_generation".to_string(), 16_000)]),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(score.sub_scores["latency"], 55.0);
        assert_eq!(score.sub_scores["scalability"], 60.0);
    }

    #[test]
    fn test_errors_and_timeouts() {
        let score = QosScorer::default()
            .score(&request(GenerationTelemetry {
                total_latency_ms: 61_000,
                errored: true,
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(score.sub_scores["reliability"], 0.0);
    }

    #[test]
    fn test_determinism_against_baseline() {
        let score = QosScorer::default()
            .score(&request(GenerationTelemetry {
                total_latency_ms: 4_000,
                stage_latency_ms: BTreeMap::from([
                    ("indicator_calc".to_string(), 900),
                    ("percentile_calc".to_string(), 210),
                ]),
                baseline: Some(LatencyBaseline {
                    mean_total_ms: 2_000.0,
                    stage_mean_ms: BTreeMap::from([
                        ("indicator_calc".to_string(), 300.0),
                        ("percentile_calc".to_string(), 200.0),
                    ]),
                }),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(score.sub_scores["determinism"], 85.0);
        // 4000 > 1.5 * 2000
        assert_eq!(score.sub_scores["scalability"], 80.0);
    }

    #[test]
    fn test_resource_budgets() {
        let score = QosScorer::default()
            .score(&request(GenerationTelemetry {
                total_latency_ms: 1_000,
                db_queries: 30,
                llm_calls: 4,
                api_calls: 3,
                ..Default::default()
            }))
            .unwrap();
        // 20 extra queries capped at 40; 2 extra calls = 20
        assert_eq!(score.sub_scores["resource_efficiency"], 40.0);
    }

    #[test]
    fn test_call_counts_saturate() {
        let score = QosScorer::default()
            .score(&request(GenerationTelemetry {
                total_latency_ms: 1_000,
                llm_calls: u32::MAX,
                api_calls: u32::MAX,
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(score.sub_scores["resource_efficiency"], 60.0);
    }

    #[test]
    fn test_requires_telemetry() {
        let req = EvaluationRequest::new(
            "narrative",
            GroundTruthContext::default(),
            "ACME",
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
        );
        let scorer = QosScorer::default();
        assert!(!scorer.applies(&req));
        assert!(matches!(
            scorer.score(&req),
            Err(ScorerError::MissingInput { .. })
        ));
    }
}
