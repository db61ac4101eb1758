//! LLM-as-judge scoring and judge/rule agreement.
//!
//! The judge always yields a verdict: transport failures and unparsable
//! responses both become the neutral verdict (score 50, confidence 0).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::JudgeConfig;
use crate::error::LlmError;
use crate::providers::{ChatMessage, CompletionRequest, LlmProvider};
use crate::types::{
    Agreement, AgreementLevel, Dimension, DimensionScore, GroundTruthContext, JudgeVerdict,
};

const STRONG_AGREEMENT_DELTA: f64 = 10.0;
const MODERATE_AGREEMENT_DELTA: f64 = 20.0;

pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are a strict financial fact-checker reviewing a generated market narrative.
You receive the narrative, the complete ground-truth context it was generated from, and the ticker.

Check every factual statement in the narrative against the context:
- numeric values (price, volatility, RSI, volume ratio, relative strength, uncertainty)
- percentile statements against the historical statistics
- news references and citations [k] against the numbered news list
- company, sector and event claims (mergers, launches, lawsuits, approvals)

Score 0-100 where 100 means every claim is supported and nothing is invented.
Confidence 0-100 reflects how certain you are of your score.

Respond with JSON only, no prose outside it:
{"score": <0-100>, "confidence": <0-100>, "hallucinations": ["..."], "validated_claims": ["..."], "reasoning": "..."}"#;

#[derive(Debug, Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    hallucinations: Vec<String>,
    #[serde(default)]
    validated_claims: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

/// Scores a narrative by asking an external model to fact-check it.
pub struct JudgeScorer {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl JudgeScorer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self::from_config(provider, &JudgeConfig::default())
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &JudgeConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Build the user message: narrative, serialized context and ticker.
    pub fn build_prompt(
        narrative: &str,
        context: &GroundTruthContext,
        ticker: &str,
    ) -> Result<String, serde_json::Error> {
        let context_json = serde_json::to_string_pretty(context)?;
        Ok(format!(
            "Ticker: {ticker}\n\nGround-truth context (JSON):\n{context_json}\n\nNarrative:\n{narrative}"
        ))
    }

    /// Ask the judge model for a verdict. Never fails.
    pub async fn judge(
        &self,
        narrative: &str,
        context: &GroundTruthContext,
        ticker: &str,
    ) -> JudgeVerdict {
        let prompt = match Self::build_prompt(narrative, context, ticker) {
            Ok(p) => p,
            Err(e) => {
                warn!(ticker, error = %e, "Failed to serialize context for judge");
                return JudgeVerdict::neutral(format!("context serialization failed: {e}"));
            }
        };
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(JUDGE_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            model: None,
        };

        let response = match self.provider.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(ticker, model = self.provider.model_name(), error = %e, "Judge call failed");
                return JudgeVerdict::neutral(format!("judge call failed: {e}"));
            }
        };
        debug!(
            ticker,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Judge responded"
        );

        match parse_verdict(&response.text) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(ticker, error = %e, "Judge response could not be decoded");
                JudgeVerdict::neutral(format!("judge response undecodable: {e}"))
            }
        }
    }
}

/// Extract the JSON object from a judge response, bare or inside a code fence.
fn json_payload(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Decode a verdict, clamping score and confidence to [0, 100].
pub fn parse_verdict(text: &str) -> Result<JudgeVerdict, LlmError> {
    let payload = json_payload(text).ok_or_else(|| LlmError::ResponseParse {
        message: "no JSON object in judge response".to_string(),
    })?;
    let raw: RawVerdict = serde_json::from_str(payload).map_err(|e| LlmError::ResponseParse {
        message: format!("invalid verdict JSON: {e}"),
    })?;
    Ok(JudgeVerdict {
        score: raw.score.clamp(0.0, 100.0),
        confidence: raw.confidence.clamp(0.0, 100.0),
        hallucinations: raw.hallucinations,
        validated_claims: raw.validated_claims,
        reasoning: raw.reasoning,
    })
}

/// Compare a judge verdict with a rule-based score.
pub fn agreement(verdict: &JudgeVerdict, rule_score: f64) -> Agreement {
    let delta = (verdict.score - rule_score).abs();
    let level = if delta <= STRONG_AGREEMENT_DELTA {
        AgreementLevel::Strong
    } else if delta <= MODERATE_AGREEMENT_DELTA {
        AgreementLevel::Moderate
    } else {
        AgreementLevel::Weak
    };
    Agreement {
        level,
        delta,
        judge_score: verdict.score,
        rule_score,
    }
}

/// Express a verdict as a single-check dimension score so it persists like the others.
pub fn verdict_score(verdict: &JudgeVerdict) -> DimensionScore {
    DimensionScore {
        dimension: Dimension::Judge,
        overall: verdict.score,
        sub_scores: BTreeMap::from([("judge_score".to_string(), verdict.score)]),
        weights: BTreeMap::from([("judge_score".to_string(), 1.0)]),
        violations: verdict
            .hallucinations
            .iter()
            .map(|h| format!("hallucination: {h}"))
            .collect(),
        strengths: verdict.validated_claims.clone(),
        details: BTreeMap::from([("confidence".to_string(), verdict.confidence)]),
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockLlmProvider;

    #[test]
    fn test_parse_fenced_verdict() {
        let text = "Here you go:\n```json\n{\"score\": 82, \"confidence\": 90, \"hallucinations\": [\"merger\"], \"reasoning\": \"mostly fine\"}\n```";
        let v = parse_verdict(text).unwrap();
        assert_eq!(v.score, 82.0);
        assert_eq!(v.hallucinations, vec!["merger".to_string()]);
        assert!(v.validated_claims.is_empty());
    }

    #[test]
    fn test_parse_clamps() {
        let v = parse_verdict(r#"{"score": 140, "confidence": -5}"#).unwrap();
        assert_eq!(v.score, 100.0);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_verdict("I think it is pretty good").is_err());
        assert!(parse_verdict(r#"{"confidence": 40}"#).is_err());
    }

    #[test]
    fn test_agreement_levels() {
        let v = JudgeVerdict {
            score: 70.0,
            ..JudgeVerdict::neutral("")
        };
        assert_eq!(agreement(&v, 80.0).level, AgreementLevel::Strong);
        assert_eq!(agreement(&v, 90.0).level, AgreementLevel::Moderate);
        assert_eq!(agreement(&v, 91.0).level, AgreementLevel::Weak);
    }

    #[tokio::test]
    async fn test_judge_decodes_mock_response() {
        let provider = Arc::new(MockLlmProvider::with_response(
            r#"{"score": 76, "confidence": 88, "validated_claims": ["price"], "reasoning": "ok"}"#,
        ));
        let verdict = JudgeScorer::new(provider.clone())
            .judge("narrative", &GroundTruthContext::default(), "ACME")
            .await;
        assert_eq!(verdict.score, 76.0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_judge_neutral_on_garbage_and_errors() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_response(MockLlmProvider::text_response("not json at all"));
        provider.queue_error(LlmError::Connection {
            message: "refused".into(),
        });
        let judge = JudgeScorer::new(provider);
        let ctx = GroundTruthContext::default();

        let undecodable = judge.judge("n", &ctx, "ACME").await;
        assert_eq!((undecodable.score, undecodable.confidence), (50.0, 0.0));
        let failed = judge.judge("n", &ctx, "ACME").await;
        assert_eq!((failed.score, failed.confidence), (50.0, 0.0));
        assert!(failed.reasoning.contains("refused"));
    }

    #[test]
    fn test_verdict_score_shape() {
        let v = JudgeVerdict {
            score: 64.0,
            confidence: 70.0,
            hallucinations: vec!["lawsuit".into()],
            validated_claims: vec![],
            reasoning: String::new(),
        };
        let s = verdict_score(&v);
        assert_eq!(s.overall, s.weighted_sum());
        assert_eq!(s.violations, vec!["hallucination: lawsuit".to_string()]);
    }
}
