//! Remote trace feedback: attach dimension scores to a trace in a
//! Langfuse-style observability backend.

use async_trait::async_trait;
use narrascope_core::config::TraceConfig;
use narrascope_core::{AggregatedResult, DimensionScore, TraceHandle};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::sink::{ResultSink, SinkOutcome};

const MAX_COMMENT_CHARS: usize = 500;
const COMMENT_VIOLATIONS: usize = 3;

#[derive(Debug, Clone)]
struct Credentials {
    public_key: String,
    secret_key: String,
}

/// Body of one score attached to a trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    pub trace_id: String,
    pub name: String,
    /// Overall score normalized to [0, 1].
    pub value: f64,
    pub comment: String,
}

impl ScorePayload {
    pub fn from_score(trace: &TraceHandle, score: &DimensionScore) -> Self {
        Self {
            trace_id: trace.as_str().to_string(),
            name: format!("narrative_{}", score.dimension),
            value: (score.overall / 100.0).clamp(0.0, 1.0),
            comment: comment(score),
        }
    }
}

/// The first few violations, or "ok", capped at [`MAX_COMMENT_CHARS`].
fn comment(score: &DimensionScore) -> String {
    if score.violations.is_empty() {
        return "ok".to_string();
    }
    let joined = score
        .violations
        .iter()
        .take(COMMENT_VIOLATIONS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("; ");
    joined.chars().take(MAX_COMMENT_CHARS).collect()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// [`ResultSink`] posting each dimension score to `{host}/api/public/scores`.
pub struct TraceFeedbackSink {
    client: Client,
    host: String,
    credentials: Option<Credentials>,
}

impl TraceFeedbackSink {
    /// Without both keys every call is skipped.
    pub fn new(
        host: impl Into<String>,
        public_key: Option<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        let credentials = match (public_key, secret_key) {
            (Some(public_key), Some(secret_key)) => Some(Credentials {
                public_key,
                secret_key,
            }),
            _ => None,
        };
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Read credentials from the environment variables named in `config`.
    pub fn from_config(config: &TraceConfig) -> Result<Self, SinkError> {
        let sink = Self::new(
            config.host.clone(),
            non_empty_env(&config.public_key_env),
            non_empty_env(&config.secret_key_env),
            Duration::from_secs(config.timeout_secs),
        )?;
        if !sink.has_credentials() {
            debug!(
                public_key_env = %config.public_key_env,
                secret_key_env = %config.secret_key_env,
                "Trace credentials not set; trace feedback disabled"
            );
        }
        Ok(sink)
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/api/public/scores", self.host)
    }

    async fn post(&self, credentials: &Credentials, payload: &ScorePayload) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(&credentials.public_key, Some(&credentials.secret_key))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ResultSink for TraceFeedbackSink {
    fn name(&self) -> &str {
        "trace"
    }

    async fn persist(
        &self,
        result: &AggregatedResult,
        trace: Option<&TraceHandle>,
    ) -> Result<SinkOutcome, SinkError> {
        let Some(trace) = trace else {
            return Ok(SinkOutcome::Skipped("no trace handle".to_string()));
        };
        let Some(credentials) = &self.credentials else {
            return Ok(SinkOutcome::Skipped("no trace credentials".to_string()));
        };

        let mut sent = 0;
        let mut last_error = None;
        for score in result.scores.values() {
            let payload = ScorePayload::from_score(trace, score);
            match self.post(credentials, &payload).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(trace = %trace, dimension = %score.dimension, error = %e, "Trace score rejected");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(SinkOutcome::Persisted(sent)),
        }
    }
}
