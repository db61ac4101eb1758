//! Faithfulness: are the narrative's facts backed by the ground-truth context?

use regex::Regex;
use std::sync::LazyLock;

use super::{CheckOutcome, DimensionScorer, ScoreCard, lowered};
use crate::config::ScoringConfig;
use crate::error::ScorerError;
use crate::extraction::{ClaimExtractor, extract_percentile_mentions};
use crate::text::{contains_any, extract_citations, mentions_name};
use crate::types::{Dimension, DimensionScore, EvaluationRequest, GroundTruthContext};

const W_NUMERIC: f64 = 0.35;
const W_PERCENTILE: f64 = 0.25;
const W_CITATION: f64 = 0.20;
const W_FACTUAL: f64 = 0.15;
const W_CLAIM_SUPPORT: f64 = 0.05;

const UNSUPPORTED_CLAIM_PENALTY: f64 = 50.0;
const SECTOR_MISMATCH_PENALTY: f64 = 50.0;

/// High-impact events a narrative must not assert unless a news title backs them.
/// Each group is (label, terms); any term in the narrative triggers the group and
/// any term in a news title supports it.
const HIGH_IMPACT_EVENTS: &[(&str, &[&str])] = &[
    ("merger", &["merger", "mergers", "merge", "merging", "合并"]),
    (
        "acquisition",
        &["acquisition", "acquisitions", "acquire", "acquires", "acquired", "收购"],
    ),
    ("launch", &["launch", "launches", "launched", "launching", "推出", "发布会"]),
    (
        "policy change",
        &["policy change", "policy shift", "new regulation", "政策变化", "政策调整"],
    ),
    ("lawsuit", &["lawsuit", "lawsuits", "litigation", "sued", "诉讼"]),
    ("bankruptcy", &["bankruptcy", "bankrupt", "破产"]),
    ("layoffs", &["layoff", "layoffs", "job cuts", "裁员"]),
    ("fda approval", &["fda approval", "fda approved", "fda clearance", "获批"]),
    ("partnership", &["partnership", "partnered", "strategic alliance", "战略合作"]),
];

static SECTOR_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(information technology|technology|tech|health\s*care|financials?|energy|utilities|industrials?|materials|real estate|consumer discretionary|consumer staples|communication services|telecom(?:munications)?)\s+(?:sector|industry|stocks?|names|peers)\b",
    )
    .expect("static regex")
});

fn canonical_sector(name: &str) -> String {
    let squashed: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    match squashed.as_str() {
        "tech" | "informationtechnology" => "technology".to_string(),
        "financial" => "financials".to_string(),
        "industrial" => "industrials".to_string(),
        "telecom" | "telecommunications" => "communicationservices".to_string(),
        _ => squashed,
    }
}

/// Scores factual agreement between narrative and context.
pub struct FaithfulnessScorer {
    extractor: ClaimExtractor,
    percentile_window: f64,
}

impl FaithfulnessScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            extractor: ClaimExtractor::from_config(config),
            percentile_window: config.percentile_window,
        }
    }

    /// Use a custom extractor, e.g. one with additional matchers.
    pub fn with_extractor(mut self, extractor: ClaimExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    fn numeric(&self, narrative: &str, context: &GroundTruthContext) -> (CheckOutcome, usize) {
        let claims = self.extractor.extract_all(narrative, context);
        if claims.is_empty() {
            return (CheckOutcome::full(), 0);
        }
        let accurate = claims.iter().filter(|c| c.accurate).count();
        let mut outcome = CheckOutcome::with_score(accurate as f64 / claims.len() as f64 * 100.0);
        for claim in &claims {
            if claim.accurate {
                outcome.strength(format!("verified {}: {}", claim.metric, claim.claimed));
            } else {
                outcome.violation(format!(
                    "{} claim {} outside ±{}% of {}",
                    claim.metric,
                    claim.claimed,
                    self.extractor.tolerance_for(claim.metric) * 100.0,
                    claim.expected
                ));
            }
        }
        (outcome, claims.len())
    }

    fn percentile(&self, narrative: &str, context: &GroundTruthContext) -> (CheckOutcome, usize) {
        let mentions = extract_percentile_mentions(narrative);
        if mentions.is_empty() {
            return (CheckOutcome::full(), 0);
        }
        let mut matched = 0usize;
        let mut outcome = CheckOutcome::full();
        for mention in &mentions {
            let hit = context
                .percentiles
                .iter()
                .find(|(_, stat)| (stat.percentile - mention.value).abs() <= self.percentile_window);
            match hit {
                Some((metric, stat)) => {
                    matched += 1;
                    outcome.strength(format!(
                        "percentile {} matches {metric} ({})",
                        mention.value, stat.percentile
                    ));
                }
                None => outcome.violation(format!(
                    "percentile claim \"{}\" matches no historical statistic",
                    mention.text
                )),
            }
        }
        outcome.score = matched as f64 / mentions.len() as f64 * 100.0;
        (outcome, mentions.len())
    }

    fn citations(narrative: &str, context: &GroundTruthContext) -> (CheckOutcome, usize) {
        let cited = extract_citations(narrative);
        if cited.is_empty() {
            return (CheckOutcome::full(), 0);
        }
        let mut outcome = CheckOutcome::full();
        let mut valid = 0usize;
        for k in &cited {
            if context.citation_is_valid(*k) {
                valid += 1;
            } else {
                outcome.violation(format!(
                    "citation [{k}] out of range ({} news items)",
                    context.news.len()
                ));
            }
        }
        outcome.score = valid as f64 / cited.len() as f64 * 100.0;
        if valid == cited.len() {
            outcome.strength(format!("all {valid} citations reference real news items"));
        }
        (outcome, cited.len())
    }

    fn factual(narrative: &str, lower: &str, context: &GroundTruthContext) -> CheckOutcome {
        let mut outcome = CheckOutcome::full();

        if let Some(name) = context.company_name()
            && mentions_name(lower, name)
        {
            outcome.strength(format!("names the company ({name})"));
        }

        if let Some(sector) = context.sector() {
            let expected = canonical_sector(sector);
            for caps in SECTOR_MENTION_RE.captures_iter(narrative) {
                let claimed = canonical_sector(&caps[1]);
                if claimed == expected || expected.contains(&claimed) {
                    outcome.strength(format!("sector consistent with context ({sector})"));
                } else {
                    outcome.penalize(
                        SECTOR_MISMATCH_PENALTY,
                        format!(
                            "narrative places the company in the {} sector, context says {sector}",
                            &caps[1]
                        ),
                    );
                }
            }
        }
        outcome
    }

    fn claim_support(lower: &str, context: &GroundTruthContext) -> CheckOutcome {
        let titles: Vec<String> = context.news.iter().map(|n| n.title.to_lowercase()).collect();
        let mut outcome = CheckOutcome::full();
        for (label, terms) in HIGH_IMPACT_EVENTS {
            if !contains_any(lower, terms) {
                continue;
            }
            if titles.iter().any(|t| contains_any(t, terms)) {
                outcome.strength(format!("{label} claim supported by news"));
            } else {
                outcome.penalize(
                    UNSUPPORTED_CLAIM_PENALTY,
                    format!("unsupported high-impact claim: {label} not found in any news title"),
                );
            }
        }
        outcome
    }
}

impl Default for FaithfulnessScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

impl DimensionScorer for FaithfulnessScorer {
    fn dimension(&self) -> Dimension {
        Dimension::Faithfulness
    }

    fn score(&self, request: &EvaluationRequest) -> Result<DimensionScore, ScorerError> {
        let narrative = request.narrative.as_str();
        let context = &request.context;
        let lower = lowered(narrative);

        let (numeric, claims) = self.numeric(narrative, context);
        let (percentile, mentions) = self.percentile(narrative, context);
        let (citation, citations) = Self::citations(narrative, context);

        let mut card = ScoreCard::new(Dimension::Faithfulness);
        card.record("numeric", W_NUMERIC, numeric);
        card.record("percentile", W_PERCENTILE, percentile);
        card.record("citation", W_CITATION, citation);
        card.record("factual", W_FACTUAL, Self::factual(narrative, &lower, context));
        card.record(
            "claim_support",
            W_CLAIM_SUPPORT,
            Self::claim_support(&lower, context),
        );
        card.detail("numeric_claims", claims as f64);
        card.detail("percentile_mentions", mentions as f64);
        card.detail("citations", citations as f64);
        Ok(card.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewsItem, PercentileStat, Sentiment, TickerMetadata};
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;

    fn news(titles: &[&str]) -> Vec<NewsItem> {
        titles
            .iter()
            .enumerate()
            .map(|(i, t)| NewsItem {
                index: i + 1,
                title: t.to_string(),
                sentiment: Sentiment::Neutral,
                impact: 40.0,
                published_at: Utc::now(),
            })
            .collect()
    }

    fn request(narrative: &str, context: GroundTruthContext) -> EvaluationRequest {
        EvaluationRequest::new(
            narrative,
            context,
            "ACME",
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
        )
    }

    #[test]
    fn test_accurate_price_and_momentum() {
        let ctx = GroundTruthContext {
            indicators: BTreeMap::from([("price".into(), 100.0), ("rsi".into(), 50.0)]),
            ..Default::default()
        };
        let score = FaithfulnessScorer::default()
            .score(&request(
                "The price of 100.00 is steady and the momentum value of 50 is neutral.",
                ctx,
            ))
            .unwrap();
        assert_eq!(score.sub_scores["numeric"], 100.0);
        assert!(score.violations.is_empty());
        assert_eq!(score.details["numeric_claims"], 2.0);
    }

    #[test]
    fn test_out_of_range_citation() {
        let ctx = GroundTruthContext {
            news: news(&["Earnings beat", "Guidance raised"]),
            ..Default::default()
        };
        let score = FaithfulnessScorer::default()
            .score(&request("Analysts cheered the results [3].", ctx))
            .unwrap();
        assert!(score.sub_scores["citation"] < 100.0);
        let citation_violations: Vec<_> = score
            .violations
            .iter()
            .filter(|v| v.contains("citation"))
            .collect();
        assert_eq!(citation_violations.len(), 1);
    }

    #[test]
    fn test_percentile_window() {
        let ctx = GroundTruthContext {
            percentiles: BTreeMap::from([(
                "volatility".to_string(),
                PercentileStat {
                    current: 31.0,
                    percentile: 86.0,
                    mean: 24.0,
                    std_dev: 4.0,
                    min: 12.0,
                    max: 40.0,
                    frequency: BTreeMap::new(),
                },
            )]),
            ..Default::default()
        };
        let scorer = FaithfulnessScorer::default();
        let ok = scorer
            .score(&request("Volatility ranks in the 90th percentile.", ctx.clone()))
            .unwrap();
        assert_eq!(ok.sub_scores["percentile"], 100.0);
        let bad = scorer
            .score(&request("Volatility ranks in the 40th percentile.", ctx))
            .unwrap();
        assert_eq!(bad.sub_scores["percentile"], 0.0);
    }

    #[test]
    fn test_unsupported_high_impact_claim() {
        let ctx = GroundTruthContext {
            news: news(&["ACME announces partnership with Globex"]),
            ..Default::default()
        };
        let score = FaithfulnessScorer::default()
            .score(&request(
                "The partnership and the pending merger lifted sentiment.",
                ctx,
            ))
            .unwrap();
        assert_eq!(score.sub_scores["claim_support"], 50.0);
        assert!(score.violations.iter().any(|v| v.contains("merger")));
        assert!(score.strengths.iter().any(|s| s.contains("partnership")));
    }

    #[test]
    fn test_sector_mismatch() {
        let ctx = GroundTruthContext {
            ticker: Some(TickerMetadata {
                company_name: Some("Acme Corp".into()),
                sector: Some("Information Technology".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let score = FaithfulnessScorer::default()
            .score(&request("Acme leads the energy sector this week.", ctx))
            .unwrap();
        assert_eq!(score.sub_scores["factual"], 50.0);
        assert!(score.strengths.iter().any(|s| s.contains("Acme Corp")));
    }

    #[test]
    fn test_company_name_inside_another_word_is_not_a_mention() {
        let ctx = GroundTruthContext {
            ticker: Some(TickerMetadata {
                company_name: Some("Acme Corp".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let score = FaithfulnessScorer::default()
            .score(&request("Shares of Acmeco drifted lower.", ctx))
            .unwrap();
        assert!(!score.strengths.iter().any(|s| s.contains("names the company")));
    }

    #[test]
    fn test_no_claims_scores_full() {
        let score = FaithfulnessScorer::default()
            .score(&request("A quiet session.", GroundTruthContext::default()))
            .unwrap();
        assert!((score.overall - 100.0).abs() < 1e-9);
    }
}
