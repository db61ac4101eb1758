//! Core data types for narrative evaluation.
//!
//! The ground-truth context is produced by the narrative pipeline and is
//! read-only here. Scores are created fresh per evaluation and never mutated
//! after the aggregator hands them to the sinks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A tracked numeric metric that narratives make claims about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Derived uncertainty index (0-100).
    Uncertainty,
    /// Annualised volatility, in percent.
    Volatility,
    /// Price performance against the benchmark, in percent.
    RelativeStrength,
    /// Current volume divided by average volume.
    VolumeRatio,
    /// Momentum oscillator (RSI).
    Momentum,
    /// Last traded price.
    Price,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Uncertainty,
        Metric::Volatility,
        Metric::RelativeStrength,
        Metric::VolumeRatio,
        Metric::Momentum,
        Metric::Price,
    ];

    /// Key of this metric in [`GroundTruthContext::indicators`].
    pub fn key(&self) -> &'static str {
        match self {
            Metric::Uncertainty => "uncertainty",
            Metric::Volatility => "volatility",
            Metric::RelativeStrength => "relative_strength",
            Metric::VolumeRatio => "volume_ratio",
            Metric::Momentum => "rsi",
            Metric::Price => "price",
        }
    }

    /// Whether this metric is quoted as a price and checked with the tight tolerance.
    pub fn is_price_like(&self) -> bool {
        matches!(self, Metric::Price)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Historical distribution of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileStat {
    pub current: f64,
    /// Rank of `current` within the history, 0-100 inclusive.
    pub percentile: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Named frequency buckets (e.g. "above_70"), each 0-100.
    #[serde(default)]
    pub frequency: BTreeMap<String, f64>,
}

impl PercentileStat {
    /// Check the [0,100] invariant on the percentile and every bucket.
    pub fn is_valid(&self) -> bool {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        in_range(self.percentile) && self.frequency.values().all(|v| in_range(*v))
    }
}

/// News sentiment label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// A news item from the context. `index` is 1-based and stable within one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub index: usize,
    pub title: String,
    pub sentiment: Sentiment,
    /// Impact score, 0-100.
    pub impact: f64,
    pub published_at: DateTime<Utc>,
}

/// Optional fundamental data for the ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    #[serde(default)]
    pub pe_ratio: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub eps: Option<f64>,
    #[serde(default)]
    pub dividend_yield: Option<f64>,
    #[serde(default)]
    pub revenue_growth_pct: Option<f64>,
}

impl Fundamentals {
    /// True when at least one fundamental value is present.
    pub fn has_data(&self) -> bool {
        self.pe_ratio.is_some()
            || self.market_cap.is_some()
            || self.eps.is_some()
            || self.dividend_yield.is_some()
            || self.revenue_growth_pct.is_some()
    }
}

/// Descriptive metadata about the ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerMetadata {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub fundamentals: Option<Fundamentals>,
}

/// Immutable snapshot of the structured data a narrative is checked against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthContext {
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
    #[serde(default)]
    pub percentiles: BTreeMap<String, PercentileStat>,
    #[serde(default)]
    pub news: Vec<NewsItem>,
    #[serde(default)]
    pub ticker: Option<TickerMetadata>,
}

impl GroundTruthContext {
    /// Value of a tracked metric, if the pipeline supplied it.
    pub fn indicator(&self, metric: Metric) -> Option<f64> {
        self.indicators.get(metric.key()).copied()
    }

    pub fn has_fundamentals(&self) -> bool {
        self.ticker
            .as_ref()
            .and_then(|t| t.fundamentals.as_ref())
            .is_some_and(Fundamentals::has_data)
    }

    pub fn company_name(&self) -> Option<&str> {
        self.ticker.as_ref()?.company_name.as_deref()
    }

    pub fn sector(&self) -> Option<&str> {
        self.ticker.as_ref()?.sector.as_deref()
    }

    /// A citation `[k]` is valid iff `1 <= k <= news.len()`.
    pub fn citation_is_valid(&self, k: usize) -> bool {
        k >= 1 && k <= self.news.len()
    }
}

/// Historical latency profile the QoS scorer compares against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyBaseline {
    pub mean_total_ms: f64,
    #[serde(default)]
    pub stage_mean_ms: BTreeMap<String, f64>,
}

/// Timing and usage telemetry for the generation run that produced the narrative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationTelemetry {
    pub total_latency_ms: u64,
    #[serde(default)]
    pub stage_latency_ms: BTreeMap<String, u64>,
    #[serde(default)]
    pub errored: bool,
    #[serde(default)]
    pub db_queries: u32,
    #[serde(default)]
    pub llm_calls: u32,
    #[serde(default)]
    pub api_calls: u32,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub baseline: Option<LatencyBaseline>,
}

/// One (narrative, context) pair to evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub narrative: String,
    pub context: GroundTruthContext,
    pub ticker: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub telemetry: Option<GenerationTelemetry>,
}

impl EvaluationRequest {
    pub fn new(
        narrative: impl Into<String>,
        context: GroundTruthContext,
        ticker: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            narrative: narrative.into(),
            context,
            ticker: ticker.into(),
            date,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: GenerationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
}

/// One independent axis of narrative quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Faithfulness,
    Completeness,
    ReasoningQuality,
    Compliance,
    Qos,
    Cost,
    Judge,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::Faithfulness,
        Dimension::Completeness,
        Dimension::ReasoningQuality,
        Dimension::Compliance,
        Dimension::Qos,
        Dimension::Cost,
        Dimension::Judge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Faithfulness => "faithfulness",
            Dimension::Completeness => "completeness",
            Dimension::ReasoningQuality => "reasoning_quality",
            Dimension::Compliance => "compliance",
            Dimension::Qos => "qos",
            Dimension::Cost => "cost",
            Dimension::Judge => "judge",
        }
    }

    /// Name of the per-dimension table in the local score store.
    pub fn table_name(&self) -> String {
        format!("{}_scores", self.as_str())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score for one dimension of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    /// Overall score, 0-100.
    pub overall: f64,
    /// Named sub-check scores, each 0-100.
    pub sub_scores: BTreeMap<String, f64>,
    /// Weight applied to each sub-score; sums to 1.0.
    pub weights: BTreeMap<String, f64>,
    pub violations: Vec<String>,
    /// Strengths and verified claims.
    pub strengths: Vec<String>,
    /// Unweighted measurements (estimated cost, latency, counts).
    #[serde(default)]
    pub details: BTreeMap<String, f64>,
    /// Set when the scorer failed and this is a placeholder.
    #[serde(default)]
    pub failure: Option<String>,
}

impl DimensionScore {
    /// Zero-score placeholder recording why a scorer did not produce a result.
    pub fn placeholder(dimension: Dimension, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            dimension,
            overall: 0.0,
            sub_scores: BTreeMap::new(),
            weights: BTreeMap::new(),
            violations: vec![format!("scorer failure: {reason}")],
            strengths: Vec::new(),
            details: BTreeMap::new(),
            failure: Some(reason),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Weighted sum of the sub-scores, before clamping.
    pub fn weighted_sum(&self) -> f64 {
        self.sub_scores
            .iter()
            .map(|(name, score)| score * self.weights.get(name).copied().unwrap_or(0.0))
            .sum()
    }
}

/// Structured verdict from the judge model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub hallucinations: Vec<String>,
    #[serde(default)]
    pub validated_claims: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl JudgeVerdict {
    /// Conservative verdict used whenever the judge response cannot be used.
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            score: 50.0,
            confidence: 0.0,
            hallucinations: Vec::new(),
            validated_claims: Vec::new(),
            reasoning: reason.into(),
        }
    }
}

/// How closely the judge agrees with a rule-based score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    Strong,
    Moderate,
    Weak,
}

/// Agreement between a judge verdict and a rule-based score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub level: AgreementLevel,
    /// Absolute difference between the two scores.
    pub delta: f64,
    pub judge_score: f64,
    pub rule_score: f64,
}

/// All dimension scores for one completed narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub ticker: String,
    pub date: NaiveDate,
    pub scores: BTreeMap<Dimension, DimensionScore>,
    #[serde(default)]
    pub judge: Option<JudgeVerdict>,
    #[serde(default)]
    pub agreement: Option<Agreement>,
    pub evaluated_at: DateTime<Utc>,
}

impl AggregatedResult {
    pub fn score(&self, dimension: Dimension) -> Option<&DimensionScore> {
        self.scores.get(&dimension)
    }

    /// Mean overall score across dimensions that did not fail.
    pub fn overall(&self) -> Option<f64> {
        let healthy: Vec<f64> = self
            .scores
            .values()
            .filter(|s| !s.is_failure())
            .map(|s| s.overall)
            .collect();
        if healthy.is_empty() {
            None
        } else {
            Some(healthy.iter().sum::<f64>() / healthy.len() as f64)
        }
    }

    pub fn failed_dimensions(&self) -> Vec<Dimension> {
        self.scores
            .values()
            .filter(|s| s.is_failure())
            .map(|s| s.dimension)
            .collect()
    }
}

/// Opaque id linking a generation event to its scores in a remote trace system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceHandle(pub String);

impl TraceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news(n: usize) -> Vec<NewsItem> {
        (1..=n)
            .map(|i| NewsItem {
                index: i,
                title: format!("headline {i}"),
                sentiment: Sentiment::Neutral,
                impact: 50.0,
                published_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_citation_range() {
        let ctx = GroundTruthContext {
            news: news(2),
            ..Default::default()
        };
        assert!(!ctx.citation_is_valid(0));
        assert!(ctx.citation_is_valid(1));
        assert!(ctx.citation_is_valid(2));
        assert!(!ctx.citation_is_valid(3));
    }

    #[test]
    fn test_fundamentals_presence() {
        let mut ctx = GroundTruthContext::default();
        assert!(!ctx.has_fundamentals());
        ctx.ticker = Some(TickerMetadata {
            fundamentals: Some(Fundamentals::default()),
            ..Default::default()
        });
        assert!(!ctx.has_fundamentals());
        ctx.ticker = Some(TickerMetadata {
            fundamentals: Some(Fundamentals {
                pe_ratio: Some(21.5),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(ctx.has_fundamentals());
    }

    #[test]
    fn test_percentile_stat_validity() {
        let mut stat = PercentileStat {
            current: 31.0,
            percentile: 88.0,
            mean: 24.0,
            std_dev: 4.0,
            min: 12.0,
            max: 40.0,
            frequency: BTreeMap::from([("above_30".to_string(), 12.0)]),
        };
        assert!(stat.is_valid());
        stat.frequency.insert("below_15".into(), 101.0);
        assert!(!stat.is_valid());
    }

    #[test]
    fn test_placeholder_records_failure() {
        let score = DimensionScore::placeholder(Dimension::Compliance, "boom");
        assert!(score.is_failure());
        assert_eq!(score.overall, 0.0);
        assert_eq!(score.violations, vec!["scorer failure: boom".to_string()]);
    }

    #[test]
    fn test_dimension_serde_and_table() {
        let json = serde_json::to_string(&Dimension::ReasoningQuality).unwrap();
        assert_eq!(json, "\"reasoning_quality\"");
        assert_eq!(Dimension::Qos.table_name(), "qos_scores");
    }

    #[test]
    fn test_context_deserializes_with_missing_sections() {
        let ctx: GroundTruthContext =
            serde_json::from_str(r#"{"indicators": {"price": 101.5}}"#).unwrap();
        assert_eq!(ctx.indicator(Metric::Price), Some(101.5));
        assert!(ctx.news.is_empty());
        assert!(ctx.ticker.is_none());
    }
}
