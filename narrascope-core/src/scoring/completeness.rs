//! Completeness: does the narrative cover everything the context supports?
//!
//! Every coverage item is only counted when its prerequisite data exists in
//! the context. Missing data excludes the item; it is never a penalty.

use super::{CheckOutcome, Coverage, DimensionScorer, ScoreCard, lowered};
use crate::error::ScorerError;
use crate::text::{
    SectionKind, contains_any, count_term, extract_citations, extract_numbers, has_keyword_heading,
    marker_sections, mentions_name, recommendation_verbs, split_sentences,
};
use crate::types::{Dimension, DimensionScore, EvaluationRequest, GroundTruthContext, Metric};

const W_IDENTITY: f64 = 0.15;
const W_ANALYTICAL_BREADTH: f64 = 0.25;
const W_TEMPORAL: f64 = 0.10;
const W_ACTIONABILITY: f64 = 0.25;
const W_STRUCTURE: f64 = 0.15;
const W_QUANTITATIVE_CONTEXT: f64 = 0.10;

pub(crate) const TECHNICAL_TERMS: &[&str] = &[
    "rsi",
    "momentum",
    "moving average",
    "macd",
    "technical",
    "support",
    "resistance",
    "trend",
    "动量",
    "技术",
    "均线",
    "趋势",
];
pub(crate) const VOLATILITY_TERMS: &[&str] = &["volatility", "volatile", "波动"];
pub(crate) const SENTIMENT_TERMS: &[&str] = &[
    "sentiment",
    "news",
    "headline",
    "headlines",
    "情绪",
    "新闻",
    "消息",
];
pub(crate) const VOLUME_TERMS: &[&str] = &["volume", "turnover", "成交量", "量比", "换手"];
pub(crate) const FUNDAMENTAL_TERMS: &[&str] = &[
    "p/e",
    "pe ratio",
    "earnings",
    "valuation",
    "eps",
    "dividend",
    "revenue",
    "market cap",
    "市盈率",
    "估值",
    "营收",
    "股息",
];
pub(crate) const HISTORICAL_TERMS: &[&str] = &[
    "percentile",
    "historical",
    "history",
    "historically",
    "百分位",
    "历史",
];

const PRICE_TERMS: &[&str] = &[
    "price",
    "trading at",
    "closed at",
    "close of",
    "股价",
    "收盘价",
    "价格",
];
const TIME_MARKERS: &[&str] = &[
    "today",
    "this week",
    "this month",
    "session",
    "recent",
    "recently",
    "days",
    "weeks",
    "month",
    "quarter",
    "year-to-date",
    "今日",
    "今天",
    "本周",
    "近期",
    "本月",
];
const HORIZON_MARKERS: &[&str] = &[
    "next",
    "coming",
    "short-term",
    "near-term",
    "medium-term",
    "outlook",
    "ahead",
    "upcoming",
    "未来",
    "短期",
    "中期",
    "后市",
];
const REASONING_TERMS: &[&str] = &[
    "because",
    "due to",
    "driven by",
    "given",
    "as a result",
    "since",
    "reflects",
    "因为",
    "由于",
    "鉴于",
];
const RISK_TERMS: &[&str] = &[
    "risk",
    "risks",
    "downside",
    "caution",
    "headwind",
    "headwinds",
    "风险",
    "谨慎",
];
const KEY_FACTOR_TERMS: &[&str] = &[
    "key factor",
    "key factors",
    "catalyst",
    "catalysts",
    "watch",
    "monitor",
    "driver",
    "drivers",
    "关注",
    "催化",
    "关键因素",
];
const INTERPRETIVE_TERMS: &[&str] = &[
    "high",
    "low",
    "elevated",
    "subdued",
    "above",
    "below",
    "suggests",
    "suggesting",
    "indicates",
    "indicating",
    "signals",
    "implies",
    "compared",
    "relative",
    "versus",
    "normal",
    "typical",
    "偏高",
    "偏低",
    "高于",
    "低于",
    "表明",
    "意味着",
];

/// Scores how much of the available context the narrative covers.
#[derive(Debug, Default)]
pub struct CompletenessScorer;

impl CompletenessScorer {
    pub fn new() -> Self {
        Self
    }

    fn check(coverage: &mut Coverage, outcome: &mut CheckOutcome, label: &str, covered: bool) {
        coverage.record(covered);
        if !covered {
            outcome.violation(format!("missing coverage: {label}"));
        }
    }

    fn finalize(coverage: Coverage, mut outcome: CheckOutcome) -> CheckOutcome {
        outcome.score = coverage.score();
        outcome
    }

    fn identity(request: &EvaluationRequest, lower: &str) -> CheckOutcome {
        let ctx = &request.context;
        let mut cov = Coverage::default();
        let mut out = CheckOutcome::full();
        let ticker = request.ticker.to_lowercase();
        Self::check(&mut cov, &mut out, "ticker", count_term(lower, &ticker) > 0);
        if let Some(name) = ctx.company_name() {
            Self::check(&mut cov, &mut out, "company name", mentions_name(lower, name));
        }
        if let Some(sector) = ctx.sector() {
            Self::check(
                &mut cov,
                &mut out,
                "sector",
                count_term(lower, &sector.to_lowercase()) > 0,
            );
        }
        if ctx.indicator(Metric::Price).is_some() {
            Self::check(
                &mut cov,
                &mut out,
                "price context",
                contains_any(lower, PRICE_TERMS) || lower.contains('$'),
            );
        }
        Self::finalize(cov, out)
    }

    fn analytical_breadth(ctx: &GroundTruthContext, lower: &str) -> CheckOutcome {
        let mut cov = Coverage::default();
        let mut out = CheckOutcome::full();
        Self::check(&mut cov, &mut out, "technical analysis", contains_any(lower, TECHNICAL_TERMS));
        Self::check(&mut cov, &mut out, "volatility", contains_any(lower, VOLATILITY_TERMS));
        if !ctx.news.is_empty() {
            let cites_news = !extract_citations(lower).is_empty();
            Self::check(
                &mut cov,
                &mut out,
                "news sentiment",
                cites_news || contains_any(lower, SENTIMENT_TERMS),
            );
        }
        if ctx.indicator(Metric::VolumeRatio).is_some() {
            Self::check(&mut cov, &mut out, "volume", contains_any(lower, VOLUME_TERMS));
        }
        if ctx.has_fundamentals() {
            Self::check(
                &mut cov,
                &mut out,
                "fundamentals",
                contains_any(lower, FUNDAMENTAL_TERMS),
            );
        }
        if !ctx.percentiles.is_empty() {
            Self::check(
                &mut cov,
                &mut out,
                "historical context",
                contains_any(lower, HISTORICAL_TERMS),
            );
        }
        Self::finalize(cov, out)
    }

    fn temporal(lower: &str) -> CheckOutcome {
        let mut cov = Coverage::default();
        let mut out = CheckOutcome::full();
        Self::check(&mut cov, &mut out, "time reference", contains_any(lower, TIME_MARKERS));
        Self::check(&mut cov, &mut out, "forward horizon", contains_any(lower, HORIZON_MARKERS));
        Self::finalize(cov, out)
    }

    fn actionability(narrative: &str, lower: &str) -> CheckOutcome {
        let mut cov = Coverage::default();
        let mut out = CheckOutcome::full();
        Self::check(
            &mut cov,
            &mut out,
            "recommendation",
            !recommendation_verbs(narrative).is_empty(),
        );
        Self::check(&mut cov, &mut out, "reasoning", contains_any(lower, REASONING_TERMS));
        Self::check(&mut cov, &mut out, "risk", contains_any(lower, RISK_TERMS));
        Self::check(&mut cov, &mut out, "key factors", contains_any(lower, KEY_FACTOR_TERMS));
        Self::finalize(cov, out)
    }

    fn structure(narrative: &str) -> CheckOutcome {
        let present: Vec<SectionKind> = marker_sections(narrative).iter().map(|s| s.kind).collect();
        let mut cov = Coverage::default();
        let mut out = CheckOutcome::full();
        for kind in SectionKind::ORDERED {
            let found = present.contains(&kind) || has_keyword_heading(narrative, kind);
            Self::check(&mut cov, &mut out, &format!("{} section", kind.label()), found);
        }
        Self::finalize(cov, out)
    }

    fn quantitative_context(narrative: &str) -> CheckOutcome {
        let mut cov = Coverage::default();
        let mut out = CheckOutcome::full();
        let mut bare = 0usize;
        for sentence in split_sentences(narrative) {
            if extract_numbers(sentence).is_empty() {
                continue;
            }
            let paired = contains_any(&sentence.to_lowercase(), INTERPRETIVE_TERMS);
            cov.record(paired);
            if !paired {
                bare += 1;
            }
        }
        if bare > 0 {
            out.violation(format!("{bare} sentence(s) state numbers without interpretation"));
        }
        Self::finalize(cov, out)
    }
}

impl DimensionScorer for CompletenessScorer {
    fn dimension(&self) -> Dimension {
        Dimension::Completeness
    }

    fn score(&self, request: &EvaluationRequest) -> Result<DimensionScore, ScorerError> {
        let narrative = request.narrative.as_str();
        let lower = lowered(narrative);

        let mut card = ScoreCard::new(Dimension::Completeness);
        card.record("identity", W_IDENTITY, Self::identity(request, &lower));
        card.record(
            "analytical_breadth",
            W_ANALYTICAL_BREADTH,
            Self::analytical_breadth(&request.context, &lower),
        );
        card.record("temporal", W_TEMPORAL, Self::temporal(&lower));
        card.record(
            "actionability",
            W_ACTIONABILITY,
            Self::actionability(narrative, &lower),
        );
        card.record("structure", W_STRUCTURE, Self::structure(narrative));
        card.record(
            "quantitative_context",
            W_QUANTITATIVE_CONTEXT,
            Self::quantitative_context(narrative),
        );
        card.detail(
            "fundamentals_applicable",
            if request.context.has_fundamentals() { 1.0 } else { 0.0 },
        );
        Ok(card.finish())
    }
}
