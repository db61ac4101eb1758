//! Compliance: the fixed structural and disclosure contract for published narratives.

use super::{CheckOutcome, DimensionScorer, ScoreCard, lowered};
use crate::config::{ComplianceConfig, TargetLanguage};
use crate::error::ScorerError;
use crate::text::{
    Section, SectionKind, contains_any, count_term, distinct_recommendation_verbs,
    extract_citations, is_list_or_table_line, language_ratio, line_count, marker_sections,
    split_sentences, word_count,
};
use crate::types::{Dimension, DimensionScore, EvaluationRequest, GroundTruthContext};

const W_STRUCTURE: f64 = 0.30;
const W_SECTION_CONTENT: f64 = 0.25;
const W_METRIC_KEYWORDS: f64 = 0.15;
const W_DISCLOSURE: f64 = 0.10;
const W_FORMAT: f64 = 0.10;
const W_CITATIONS: f64 = 0.10;

const POINTS_PER_SECTION: f64 = 25.0;
const OUT_OF_ORDER_PENALTY: f64 = 20.0;
const SECTION_GRAMMAR_PENALTY: f64 = 25.0;
const MISSING_METRIC_PENALTY: f64 = 25.0;
const DISCLOSURE_PENALTY: f64 = 50.0;
const LINE_BOUNDS_PENALTY: f64 = 30.0;
const WORD_BOUNDS_PENALTY: f64 = 40.0;
const LANGUAGE_PENALTY: f64 = 30.0;
const BAD_CITATION_PENALTY: f64 = 25.0;

const SNAPSHOT_SENTENCES: std::ops::RangeInclusive<usize> = 2..=4;

const RISK_KEYWORDS: &[&str] = &[
    "risk",
    "risks",
    "downside",
    "headwind",
    "headwinds",
    "uncertainty",
    "volatility",
    "drawdown",
    "风险",
    "不确定",
    "回撤",
];

/// Metric keywords the snapshot section must mention: (label, accepted terms).
const SNAPSHOT_METRICS: &[(&str, &[&str])] = &[
    ("price", &["price", "股价", "收盘价", "价格"]),
    ("volatility", &["volatility", "波动"]),
    ("momentum", &["rsi", "momentum", "动量"]),
    ("volume", &["volume", "成交量", "量比"]),
];

/// Scores adherence to the required narrative layout and disclosure rules.
pub struct ComplianceScorer {
    config: ComplianceConfig,
}

impl ComplianceScorer {
    pub fn new(config: ComplianceConfig) -> Self {
        Self { config }
    }

    fn structure(sections: &[Section]) -> CheckOutcome {
        let mut out = CheckOutcome::with_score(0.0);
        let mut first_seen: Vec<SectionKind> = Vec::new();
        for section in sections {
            if !first_seen.contains(&section.kind) {
                first_seen.push(section.kind);
            }
        }
        for kind in SectionKind::ORDERED {
            if first_seen.contains(&kind) {
                out.score += POINTS_PER_SECTION;
            } else {
                out.violation(format!(
                    "missing {} {} section",
                    kind.marker(),
                    kind.label()
                ));
            }
        }
        if first_seen.windows(2).any(|pair| pair[0] > pair[1]) {
            out.penalize(
                OUT_OF_ORDER_PENALTY,
                "sections out of order (expected snapshot, insight, recommendation, risk)",
            );
        } else if first_seen.len() == SectionKind::ORDERED.len() {
            out.strength("all four sections present in order");
        }
        out
    }

    fn section_content(sections: &[Section]) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        for kind in SectionKind::ORDERED {
            let Some(section) = sections.iter().find(|s| s.kind == kind) else {
                out.score -= SECTION_GRAMMAR_PENALTY;
                continue;
            };
            let body = section.body();
            let problem = match kind {
                SectionKind::Snapshot => {
                    let n = split_sentences(&body).len();
                    (!SNAPSHOT_SENTENCES.contains(&n))
                        .then(|| format!("snapshot has {n} sentences, expected 2-4"))
                }
                SectionKind::Insight => body
                    .lines()
                    .any(is_list_or_table_line)
                    .then(|| "insight section uses list or table formatting".to_string()),
                SectionKind::Recommendation => {
                    let verbs = distinct_recommendation_verbs(&body).len();
                    (verbs != 1).then(|| {
                        format!("recommendation names {verbs} of BUY/HOLD/SELL, expected exactly one")
                    })
                }
                SectionKind::Risk => (!contains_any(&body.to_lowercase(), RISK_KEYWORDS))
                    .then(|| "risk section names no risk".to_string()),
            };
            match problem {
                Some(p) => out.penalize(SECTION_GRAMMAR_PENALTY, p),
                None => out.strength(format!("{} section well formed", kind.label())),
            }
        }
        out
    }

    fn metric_keywords(sections: &[Section]) -> CheckOutcome {
        let Some(snapshot) = sections.iter().find(|s| s.kind == SectionKind::Snapshot) else {
            let mut out = CheckOutcome::with_score(0.0);
            out.violation("no snapshot section to carry the key metrics");
            return out;
        };
        let body = snapshot.body().to_lowercase();
        let mut out = CheckOutcome::full();
        for (label, terms) in SNAPSHOT_METRICS {
            if !contains_any(&body, terms) {
                out.penalize(
                    MISSING_METRIC_PENALTY,
                    format!("snapshot does not mention {label}"),
                );
            }
        }
        out
    }

    fn disclosure(&self, lower: &str) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        for name in &self.config.internal_strategy_names {
            if count_term(lower, &name.to_lowercase()) > 0 {
                out.penalize(
                    DISCLOSURE_PENALTY,
                    format!("discloses internal strategy name \"{name}\""),
                );
            }
        }
        out
    }

    fn format(&self, narrative: &str, card: &mut ScoreCard) -> CheckOutcome {
        let c = &self.config;
        let mut out = CheckOutcome::full();
        let lines = line_count(narrative);
        let words = word_count(narrative);
        let ratio = language_ratio(narrative, c.target_language);
        if lines < c.min_lines || lines > c.max_lines {
            out.penalize(
                LINE_BOUNDS_PENALTY,
                format!("{lines} lines outside [{}, {}]", c.min_lines, c.max_lines),
            );
        }
        if words < c.min_words || words > c.max_words {
            out.penalize(
                WORD_BOUNDS_PENALTY,
                format!("{words} words outside [{}, {}]", c.min_words, c.max_words),
            );
        }
        if ratio < c.min_language_ratio {
            let language = match c.target_language {
                TargetLanguage::English => "English",
                TargetLanguage::Chinese => "Chinese",
            };
            out.penalize(
                LANGUAGE_PENALTY,
                format!(
                    "{language} character ratio {ratio:.2} below {:.2}",
                    c.min_language_ratio
                ),
            );
        }
        card.detail("lines", lines as f64);
        card.detail("words", words as f64);
        card.detail("language_ratio", ratio);
        out
    }

    fn citations(narrative: &str, context: &GroundTruthContext) -> CheckOutcome {
        let mut out = CheckOutcome::full();
        for k in extract_citations(narrative) {
            if !context.citation_is_valid(k) {
                out.penalize(
                    BAD_CITATION_PENALTY,
                    format!("citation [{k}] out of range ({} news items)", context.news.len()),
                );
            }
        }
        out
    }
}

impl Default for ComplianceScorer {
    fn default() -> Self {
        Self::new(ComplianceConfig::default())
    }
}

impl DimensionScorer for ComplianceScorer {
    fn dimension(&self) -> Dimension {
        Dimension::Compliance
    }

    fn score(&self, request: &EvaluationRequest) -> Result<DimensionScore, ScorerError> {
        let narrative = request.narrative.as_str();
        let sections = marker_sections(narrative);
        let lower = lowered(narrative);

        let mut card = ScoreCard::new(Dimension::Compliance);
        card.record("structure", W_STRUCTURE, Self::structure(&sections));
        card.record(
            "section_content",
            W_SECTION_CONTENT,
            Self::section_content(&sections),
        );
        card.record(
            "metric_keywords",
            W_METRIC_KEYWORDS,
            Self::metric_keywords(&sections),
        );
        card.record("disclosure", W_DISCLOSURE, self.disclosure(&lower));
        let format = self.format(narrative, &mut card);
        card.record("format", W_FORMAT, format);
        card.record(
            "citations",
            W_CITATIONS,
            Self::citations(narrative, &request.context),
        );
        Ok(card.finish())
    }
}
