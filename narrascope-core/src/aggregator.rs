//! Score aggregation: run every registered scorer against one request.
//!
//! Scorers are CPU-bound and independent, so each runs on the blocking pool
//! and they are awaited together. A scorer that errors or panics is replaced
//! by a placeholder score; it never takes the other dimensions down with it.

use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, ScoringConfig};
use crate::error::ScorerError;
use crate::judge::{JudgeScorer, agreement, verdict_score};
use crate::providers::{LlmProvider, create_judge_provider};
use crate::scoring::{
    CompletenessScorer, ComplianceScorer, CostScorer, DimensionScorer, FaithfulnessScorer,
    QosScorer, ReasoningQualityScorer,
};
use crate::types::{AggregatedResult, Dimension, DimensionScore, EvaluationRequest, JudgeVerdict};

/// Explicit mapping from dimension to the scorer that produces it.
#[derive(Clone, Default)]
pub struct ScorerRegistry {
    scorers: BTreeMap<Dimension, Arc<dyn DimensionScorer>>,
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six rule-based scorers configured from `config`.
    pub fn with_defaults(config: &ScoringConfig) -> Self {
        Self::new()
            .with(Arc::new(FaithfulnessScorer::new(config)))
            .with(Arc::new(CompletenessScorer::new()))
            .with(Arc::new(ReasoningQualityScorer::new()))
            .with(Arc::new(ComplianceScorer::new(config.compliance.clone())))
            .with(Arc::new(QosScorer::new(config.qos.clone())))
            .with(Arc::new(CostScorer::new(config.cost.clone())))
    }

    /// Register a scorer, replacing any existing scorer for its dimension.
    pub fn register(
        &mut self,
        scorer: Arc<dyn DimensionScorer>,
    ) -> Option<Arc<dyn DimensionScorer>> {
        self.scorers.insert(scorer.dimension(), scorer)
    }

    pub fn with(mut self, scorer: Arc<dyn DimensionScorer>) -> Self {
        self.register(scorer);
        self
    }

    pub fn get(&self, dimension: Dimension) -> Option<&Arc<dyn DimensionScorer>> {
        self.scorers.get(&dimension)
    }

    pub fn dimensions(&self) -> Vec<Dimension> {
        self.scorers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }
}

/// Runs the registered scorers (and optionally the judge) for one request.
pub struct ScoreAggregator {
    registry: ScorerRegistry,
    judge: Option<JudgeScorer>,
    judge_timeout: Duration,
}

impl ScoreAggregator {
    pub fn new(registry: ScorerRegistry) -> Self {
        Self {
            registry,
            judge: None,
            judge_timeout: Duration::from_secs(60),
        }
    }

    /// Build from configuration. The judge runs only when enabled and a provider is given.
    pub fn from_config(config: &EngineConfig, judge_provider: Option<Arc<dyn LlmProvider>>) -> Self {
        let aggregator = Self::new(ScorerRegistry::with_defaults(&config.scoring));
        match judge_provider {
            Some(provider) if config.judge.enabled => aggregator.with_judge(
                JudgeScorer::from_config(provider, &config.judge),
                Duration::from_secs(config.judge.timeout_secs),
            ),
            _ => aggregator,
        }
    }

    /// Build from configuration alone: validate it, then connect the judge's
    /// provider when the judge is enabled.
    pub fn try_from_config(config: &EngineConfig) -> crate::error::Result<Self> {
        config.validate()?;
        let provider = create_judge_provider(&config.judge)?;
        Ok(Self::from_config(config, provider))
    }

    /// Attach a judge. Its call is abandoned, with a neutral verdict, after `timeout`.
    pub fn with_judge(mut self, judge: JudgeScorer, timeout: Duration) -> Self {
        self.judge = Some(judge);
        self.judge_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ScorerRegistry {
        &self.registry
    }

    pub fn has_judge(&self) -> bool {
        self.judge.is_some()
    }

    /// Score one request. Never fails; scorer failures become placeholders.
    pub async fn evaluate(&self, request: Arc<EvaluationRequest>) -> AggregatedResult {
        let (dimensions, tasks): (Vec<_>, Vec<_>) = self
            .registry
            .scorers
            .iter()
            .map(|(dimension, scorer)| {
                let scorer = Arc::clone(scorer);
                let req = Arc::clone(&request);
                let task = tokio::task::spawn_blocking(move || {
                    scorer.applies(&req).then(|| scorer.score(&req))
                });
                (*dimension, task)
            })
            .unzip();

        let mut scores = BTreeMap::new();
        for (dimension, outcome) in dimensions.into_iter().zip(join_all(tasks).await) {
            match outcome {
                Ok(None) => {
                    debug!(ticker = %request.ticker, %dimension, "Scorer skipped: inputs not present");
                }
                Ok(Some(Ok(score))) => {
                    scores.insert(dimension, score);
                }
                Ok(Some(Err(e))) => {
                    warn!(ticker = %request.ticker, %dimension, error = %e, "Scorer failed");
                    scores.insert(dimension, DimensionScore::placeholder(dimension, e.to_string()));
                }
                Err(join_err) => {
                    let err = ScorerError::Panicked {
                        dimension,
                        message: panic_message(join_err),
                    };
                    error!(ticker = %request.ticker, %dimension, error = %err, "Scorer panicked");
                    scores.insert(dimension, DimensionScore::placeholder(dimension, err.to_string()));
                }
            }
        }

        let mut judge = None;
        let mut judge_agreement = None;
        if let Some(judge_scorer) = &self.judge {
            let verdict = tokio::time::timeout(
                self.judge_timeout,
                judge_scorer.judge(&request.narrative, &request.context, &request.ticker),
            )
            .await
            .unwrap_or_else(|_| {
                warn!(ticker = %request.ticker, timeout_secs = self.judge_timeout.as_secs(), "Judge timed out");
                JudgeVerdict::neutral("judge timed out")
            });
            if let Some(rule) = scores.get(&Dimension::Faithfulness)
                && !rule.is_failure()
            {
                judge_agreement = Some(agreement(&verdict, rule.overall));
            }
            scores.insert(Dimension::Judge, verdict_score(&verdict));
            judge = Some(verdict);
        }

        let result = AggregatedResult {
            ticker: request.ticker.clone(),
            date: request.date,
            scores,
            judge,
            agreement: judge_agreement,
            evaluated_at: Utc::now(),
        };
        info!(
            ticker = %result.ticker,
            date = %result.date,
            dimensions = result.scores.len(),
            failed = result.failed_dimensions().len(),
            overall = result.overall().unwrap_or(0.0),
            "Narrative evaluated"
        );
        result
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
