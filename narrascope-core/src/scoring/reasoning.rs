//! Reasoning quality: is the narrative's argument clear, specific and consistent?

use std::collections::HashSet;

use super::completeness::{
    FUNDAMENTAL_TERMS, HISTORICAL_TERMS, SENTIMENT_TERMS, TECHNICAL_TERMS, VOLATILITY_TERMS,
    VOLUME_TERMS,
};
use super::{CheckOutcome, DimensionScorer, ScoreCard, lowered};
use crate::error::ScorerError;
use crate::extraction::extract_percentile_mentions;
use crate::text::{
    contains_any, count_terms, distinct_recommendation_verbs, extract_numbers, marker_sections,
    segments, split_sentences, word_count,
};
use crate::types::{Dimension, DimensionScore, EvaluationRequest, GroundTruthContext, Metric};

const W_CLARITY: f64 = 0.20;
const W_COVERAGE: f64 = 0.20;
const W_SPECIFICITY: f64 = 0.20;
const W_ALIGNMENT: f64 = 0.20;
const W_MINIMALITY: f64 = 0.10;
const W_CONSISTENCY: f64 = 0.10;

const VAGUE_TERMS: &[&str] = &[
    "might",
    "could",
    "possibly",
    "perhaps",
    "somewhat",
    "fairly",
    "various",
    "certain factors",
    "things",
    "stuff",
    "kind of",
    "sort of",
    "may or may not",
    "也许",
    "或许",
    "某些",
];
const FREE_VAGUE_TERMS: usize = 2;
const VAGUE_PENALTY_EACH: f64 = 5.0;
const VAGUE_PENALTY_CAP: f64 = 30.0;

const CONNECTIVES: &[&str] = &[
    "because",
    "therefore",
    "due to",
    "as a result",
    "driven by",
    "which means",
    "thus",
    "hence",
    "consequently",
    "因为",
    "因此",
    "由于",
    "所以",
];
const NO_CONNECTIVE_PENALTY: f64 = 25.0;
const LONG_SENTENCE_WORDS: f64 = 35.0;
const LONG_SENTENCE_PENALTY: f64 = 20.0;
const SHORT_SENTENCE_WORDS: f64 = 5.0;
const SHORT_SENTENCE_PENALTY: f64 = 15.0;

const WHY_TERMS: &[&str] = &[
    "because",
    "driven by",
    "due to",
    "reflects",
    "explains",
    "the reason",
    "which suggests",
    "因为",
    "由于",
    "反映",
];
const NO_WHY_PENALTY: f64 = 20.0;
/// Coverage score by number of analytical dimensions explained (index = count, capped at 5).
const COVERAGE_TIERS: [f64; 6] = [0.0, 30.0, 50.0, 70.0, 85.0, 100.0];

const COMPARISON_TERMS: &[&str] = &[
    "higher than",
    "lower than",
    "above",
    "below",
    "compared to",
    "compared with",
    "versus",
    "vs",
    "relative to",
    "more than",
    "less than",
    "outperformed",
    "underperformed",
    "高于",
    "低于",
    "相比",
];
const GENERIC_PHRASES: &[&str] = &[
    "market conditions",
    "going forward",
    "at this time",
    "it is important to note",
    "in general",
    "various factors",
    "mixed signals",
    "time will tell",
    "remains to be seen",
    "市场环境",
    "总体来看",
];

const STABLE_TERMS: &[&str] = &["stable", "calm", "low uncertainty", "稳定", "平稳"];
const MODERATE_TERMS: &[&str] = &["moderate", "moderate uncertainty", "中等"];
const HIGH_TERMS: &[&str] = &["high uncertainty", "elevated uncertainty", "较高", "高度不确定"];
const EXTREME_TERMS: &[&str] = &["extreme", "severe", "panic", "极端", "剧烈"];
const BAND_MISMATCH_PENALTY: f64 = 30.0;

const OVERBOUGHT_TERMS: &[&str] = &["overbought", "超买"];
const OVERSOLD_TERMS: &[&str] = &["oversold", "超卖"];
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_MISUSE_PENALTY: f64 = 20.0;

const HIGH_PERCENTILE_TERMS: &[&str] = &["high", "elevated", "extreme", "top", "upper", "偏高", "高位"];
const LOW_PERCENTILE_TERMS: &[&str] = &["low", "subdued", "depressed", "bottom", "lower", "偏低", "低位"];
const HIGH_PERCENTILE: f64 = 80.0;
const LOW_PERCENTILE: f64 = 20.0;
const PERCENTILE_MISUSE_PENALTY: f64 = 20.0;

const MIN_WORDS: usize = 100;
const MAX_WORDS: usize = 450;
const WORD_BAND_PENALTY: f64 = 20.0;
const MIN_UNIQUENESS: f64 = 0.9;
const REPETITION_PENALTY: f64 = 25.0;
const FILLER_PHRASES: &[&str] = &[
    "it is worth noting",
    "it should be noted",
    "needless to say",
    "as mentioned",
    "as previously mentioned",
    "in conclusion",
    "to be honest",
    "basically",
    "essentially",
    "at the end of the day",
    "值得注意的是",
    "总而言之",
];
const FILLER_PENALTY_EACH: f64 = 10.0;
const FILLER_PENALTY_CAP: f64 = 30.0;

const CONFLICTING_VERBS_SCORE: f64 = 40.0;
const NO_VERB_SCORE: f64 = 70.0;

/// Uncertainty band expected for a derived uncertainty value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UncertaintyBand {
    Stable,
    Moderate,
    High,
    Extreme,
}

impl UncertaintyBand {
    const ALL: [UncertaintyBand; 4] = [
        UncertaintyBand::Stable,
        UncertaintyBand::Moderate,
        UncertaintyBand::High,
        UncertaintyBand::Extreme,
    ];

    fn for_value(value: f64) -> Self {
        if value < 25.0 {
            Self::Stable
        } else if value < 50.0 {
            Self::Moderate
        } else if value < 75.0 {
            Self::High
        } else {
            Self::Extreme
        }
    }

    fn terms(&self) -> &'static [&'static str] {
        match self {
            Self::Stable => STABLE_TERMS,
            Self::Moderate => MODERATE_TERMS,
            Self::High => HIGH_TERMS,
            Self::Extreme => EXTREME_TERMS,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Extreme => "extreme",
        }
    }
}

/// Scores the quality of the narrative's reasoning.
#[derive(Debug, Default)]
pub struct ReasoningQualityScorer;

impl ReasoningQualityScorer {
    pub fn new() -> Self {
        Self
    }

    fn clarity(lower: &str, sentences: &[&str]) -> CheckOutcome {
        let mut out = CheckOutcome::full();

        let vague = count_terms(lower, VAGUE_TERMS);
        if vague > FREE_VAGUE_TERMS {
            let penalty =
                ((vague - FREE_VAGUE_TERMS) as f64 * VAGUE_PENALTY_EACH).min(VAGUE_PENALTY_CAP);
            out.penalize(penalty, format!("{vague} vague terms"));
        }

        if contains_any(lower, CONNECTIVES) {
            out.strength("uses explanatory connectives");
        } else {
            out.penalize(NO_CONNECTIVE_PENALTY, "no causal or explanatory connectives");
        }

        if !sentences.is_empty() {
            let avg = sentences.iter().map(|s| word_count(s)).sum::<usize>() as f64
                / sentences.len() as f64;
            if avg > LONG_SENTENCE_WORDS {
                out.penalize(
                    LONG_SENTENCE_PENALTY,
                    format!("average sentence length {avg:.1} words is too long"),
                );
            } else if avg < SHORT_SENTENCE_WORDS {
                out.penalize(
                    SHORT_SENTENCE_PENALTY,
                    format!("average sentence length {avg:.1} words is too short"),
                );
            }
        }
        out
    }

    fn coverage(lower: &str) -> CheckOutcome {
        let explained = [
            TECHNICAL_TERMS,
            VOLATILITY_TERMS,
            SENTIMENT_TERMS,
            VOLUME_TERMS,
            FUNDAMENTAL_TERMS,
            HISTORICAL_TERMS,
        ]
        .iter()
        .filter(|terms| contains_any(lower, terms))
        .count();
        let mut out = CheckOutcome::with_score(COVERAGE_TIERS[explained.min(5)]);
        if explained < 3 {
            out.violation(format!("only {explained} analytical dimensions discussed"));
        }
        if !contains_any(lower, WHY_TERMS) {
            out.penalize(NO_WHY_PENALTY, "never explains why the metrics moved");
        }
        out
    }

    fn specificity(narrative: &str, lower: &str) -> CheckOutcome {
        let numbers = extract_numbers(narrative).len();
        let comparisons = count_terms(lower, COMPARISON_TERMS);
        let generic = count_terms(lower, GENERIC_PHRASES);
        let score = 50.0 + (numbers as f64 * 5.0).min(30.0) + (comparisons as f64 * 10.0).min(20.0)
            - generic as f64 * 10.0;
        let mut out = CheckOutcome::with_score(score);
        if generic > 0 {
            out.violation(format!("{generic} generic phrase(s)"));
        }
        if numbers >= 6 && comparisons >= 2 {
            out.strength("specific, comparative claims");
        }
        out
    }

    fn alignment(lower: &str, sentences: &[&str], context: &GroundTruthContext) -> CheckOutcome {
        let mut out = CheckOutcome::full();

        if let Some(value) = context.indicator(Metric::Uncertainty) {
            let expected = UncertaintyBand::for_value(value);
            let uses_expected = contains_any(lower, expected.terms());
            let other = UncertaintyBand::ALL
                .iter()
                .find(|b| **b != expected && contains_any(lower, b.terms()));
            match (uses_expected, other) {
                (false, Some(band)) => out.penalize(
                    BAND_MISMATCH_PENALTY,
                    format!(
                        "uncertainty {value} is {} but narrative describes it as {}",
                        expected.label(),
                        band.label()
                    ),
                ),
                (true, _) => out.strength(format!("uncertainty described as {}", expected.label())),
                _ => {}
            }
        }

        if let Some(rsi) = context.indicator(Metric::Momentum) {
            if rsi < RSI_OVERBOUGHT && contains_any(lower, OVERBOUGHT_TERMS) {
                out.penalize(
                    RSI_MISUSE_PENALTY,
                    format!("\"overbought\" used with RSI {rsi} below {RSI_OVERBOUGHT}"),
                );
            }
            if rsi > RSI_OVERSOLD && contains_any(lower, OVERSOLD_TERMS) {
                out.penalize(
                    RSI_MISUSE_PENALTY,
                    format!("\"oversold\" used with RSI {rsi} above {RSI_OVERSOLD}"),
                );
            }
        }

        for sentence in sentences {
            let mentions = extract_percentile_mentions(sentence);
            if mentions.is_empty() {
                continue;
            }
            let s = sentence.to_lowercase();
            let high = contains_any(&s, HIGH_PERCENTILE_TERMS);
            let low = contains_any(&s, LOW_PERCENTILE_TERMS);
            for mention in mentions {
                if high && mention.value < HIGH_PERCENTILE {
                    out.penalize(
                        PERCENTILE_MISUSE_PENALTY,
                        format!("\"{}\" described as high", mention.text),
                    );
                }
                if low && mention.value > LOW_PERCENTILE {
                    out.penalize(
                        PERCENTILE_MISUSE_PENALTY,
                        format!("\"{}\" described as low", mention.text),
                    );
                }
            }
        }
        out
    }

    fn minimality(narrative: &str, lower: &str, sentences: &[&str]) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        let words = word_count(narrative);
        if !(MIN_WORDS..=MAX_WORDS).contains(&words) {
            out.penalize(
                WORD_BAND_PENALTY,
                format!("{words} words outside [{MIN_WORDS}, {MAX_WORDS}]"),
            );
        }

        if !sentences.is_empty() {
            let unique: HashSet<String> = sentences.iter().map(|s| s.to_lowercase()).collect();
            let ratio = unique.len() as f64 / sentences.len() as f64;
            if ratio < MIN_UNIQUENESS {
                out.penalize(
                    REPETITION_PENALTY,
                    format!("sentence uniqueness {ratio:.2} below {MIN_UNIQUENESS}"),
                );
            }
        }

        let filler = count_terms(lower, FILLER_PHRASES);
        if filler > 0 {
            out.penalize(
                (filler as f64 * FILLER_PENALTY_EACH).min(FILLER_PENALTY_CAP),
                format!("{filler} filler phrase(s)"),
            );
        }
        out
    }

    fn consistency(narrative: &str) -> CheckOutcome {
        let parts = if marker_sections(narrative).is_empty() {
            vec![narrative.to_string()]
        } else {
            segments(narrative)
        };
        if let Some(part) = parts
            .iter()
            .find(|p| distinct_recommendation_verbs(p).len() > 1)
        {
            let mut out = CheckOutcome::with_score(CONFLICTING_VERBS_SCORE);
            let first_line = part.lines().next().unwrap_or_default();
            out.violation(format!(
                "conflicting recommendations within one section ({first_line})"
            ));
            return out;
        }
        if distinct_recommendation_verbs(narrative).is_empty() {
            let mut out = CheckOutcome::with_score(NO_VERB_SCORE);
            out.violation("no recommendation verb");
            return out;
        }
        let mut out = CheckOutcome::full();
        out.strength("single consistent recommendation");
        out
    }
}

impl DimensionScorer for ReasoningQualityScorer {
    fn dimension(&self) -> Dimension {
        Dimension::ReasoningQuality
    }

    fn score(&self, request: &EvaluationRequest) -> Result<DimensionScore, ScorerError> {
        let narrative = request.narrative.as_str();
        let lower = lowered(narrative);
        let sentences = split_sentences(narrative);

        let mut card = ScoreCard::new(Dimension::ReasoningQuality);
        card.record("clarity", W_CLARITY, Self::clarity(&lower, &sentences));
        card.record("coverage", W_COVERAGE, Self::coverage(&lower));
        card.record(
            "specificity",
            W_SPECIFICITY,
            Self::specificity(narrative, &lower),
        );
        card.record(
            "alignment",
            W_ALIGNMENT,
            Self::alignment(&lower, &sentences, &request.context),
        );
        card.record(
            "minimality",
            W_MINIMALITY,
            Self::minimality(narrative, &lower, &sentences),
        );
        card.record("consistency", W_CONSISTENCY, Self::consistency(narrative));
        card.detail("sentences", sentences.len() as f64);
        Ok(card.finish())
    }
}
