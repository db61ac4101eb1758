//! # Narrascope Core
//!
//! Core library for evaluating generated market narratives.
//! Provides the ground-truth data model, claim extraction, the rule-based
//! dimension scorers, the LLM judge, score aggregation, and configuration.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod extraction;
pub mod judge;
pub mod providers;
pub mod scoring;
pub mod text;
pub mod types;

// Re-export commonly used types at the crate root.
pub use aggregator::{ScoreAggregator, ScorerRegistry};
pub use config::{EngineConfig, ScoringConfig, TargetLanguage, load_config};
pub use error::{ConfigError, LlmError, NarrascopeError, Result, ScorerError};
pub use extraction::{Claim, ClaimExtractor, ClaimMatcher, RegexMatcher};
pub use judge::{JudgeScorer, agreement};
pub use providers::{
    LlmProvider, MockLlmProvider, OpenAiCompatibleProvider, create_judge_provider,
};
pub use scoring::{
    CompletenessScorer, ComplianceScorer, CostScorer, DimensionScorer, FaithfulnessScorer,
    QosScorer, ReasoningQualityScorer,
};
pub use types::{
    AggregatedResult, Agreement, AgreementLevel, Dimension, DimensionScore, EvaluationRequest,
    GenerationTelemetry, GroundTruthContext, JudgeVerdict, Metric, NewsItem, PercentileStat,
    TraceHandle,
};
