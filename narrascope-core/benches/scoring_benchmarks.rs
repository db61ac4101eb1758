use chrono::{NaiveDate, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use narrascope_core::extraction::extract_percentile_mentions;
use narrascope_core::types::{NewsItem, Sentiment};
use narrascope_core::{
    ClaimExtractor, ComplianceScorer, DimensionScorer, EvaluationRequest, FaithfulnessScorer,
    GroundTruthContext, Metric, ReasoningQualityScorer,
};
use std::collections::BTreeMap;

const NARRATIVE: &str = "📊 Snapshot\n\
ACME closed at $187.40 today. Volatility is 28.5% and sits in the 86th percentile of its history. \
RSI is 64 and volume ratio of 1.4 points to steady participation.\n\
💡 Insight\n\
Momentum is strong because the stock outperformed the benchmark by 3.2% this month, driven by the \
earnings beat [1]. Volatility is elevated compared with its 24% mean.\n\
🎯 Recommendation\n\
HOLD for the next two weeks; watch the guidance update [2].\n\
⚠️ Risk\n\
Downside risk rises if volatility expands above 35%.";

fn context() -> GroundTruthContext {
    GroundTruthContext {
        indicators: BTreeMap::from([
            ("price".to_string(), 187.40),
            ("volatility".to_string(), 28.5),
            ("rsi".to_string(), 64.0),
            ("volume_ratio".to_string(), 1.4),
            ("relative_strength".to_string(), 3.2),
        ]),
        news: (1..=2)
            .map(|i| NewsItem {
                index: i,
                title: format!("ACME headline {i}"),
                sentiment: Sentiment::Positive,
                impact: 60.0,
                published_at: Utc::now(),
            })
            .collect(),
        ..Default::default()
    }
}

fn bench_extraction(c: &mut Criterion) {
    let extractor = ClaimExtractor::default();
    let ctx = context();

    c.bench_function("extract_all_claims", |b| {
        b.iter(|| extractor.extract_all(black_box(NARRATIVE), black_box(&ctx)))
    });

    c.bench_function("extract_price_claim", |b| {
        b.iter(|| extractor.extract(black_box(NARRATIVE), Metric::Price, 187.40))
    });

    c.bench_function("extract_percentile_mentions", |b| {
        b.iter(|| extract_percentile_mentions(black_box(NARRATIVE)))
    });
}

fn bench_scorers(c: &mut Criterion) {
    let request = EvaluationRequest::new(
        NARRATIVE,
        context(),
        "ACME",
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
    );
    let faithfulness = FaithfulnessScorer::default();
    let compliance = ComplianceScorer::default();
    let reasoning = ReasoningQualityScorer::new();

    c.bench_function("faithfulness_score", |b| {
        b.iter(|| faithfulness.score(black_box(&request)))
    });
    c.bench_function("compliance_score", |b| {
        b.iter(|| compliance.score(black_box(&request)))
    });
    c.bench_function("reasoning_score", |b| {
        b.iter(|| reasoning.score(black_box(&request)))
    });
}

criterion_group!(benches, bench_extraction, bench_scorers);
criterion_main!(benches);
