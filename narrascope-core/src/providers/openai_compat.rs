//! OpenAI-compatible chat completion provider.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, LlmProvider, TokenUsage};
use crate::config::JudgeConfig;
use crate::error::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible LLM provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider from the judge configuration.
    ///
    /// Reads the API key from the environment variable named in `config.api_key_env`.
    /// Local endpoints (localhost) do not need a key.
    pub fn new(config: &JudgeConfig) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_ref()
            .is_some_and(|u| u.contains("localhost") || u.contains("127.0.0.1"));

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local judge endpoint; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!("OpenAI-compatible: env var '{}' not set", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new provider with an explicitly provided API key.
    pub fn new_with_key(config: &JudgeConfig, api_key: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Parse an OpenAI-format response body into a CompletionResponse.
    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message content in choice".to_string(),
            })?
            .to_string();

        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as usize,
                output_tokens: u
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            usage,
            model: body
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(model)
                .to_string(),
            finish_reason: choice
                .get("finish_reason")
                .and_then(|f| f.as_str())
                .map(|s| s.to_string()),
        })
    }

    /// Map an HTTP status code to the appropriate LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status.as_u16());
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        // "Rate limit reached ... try again in 7s"
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            code if code >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({status}): {body}"),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {status}: {body}"),
            },
        }
    }

    fn map_transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if e.is_connect() {
            LlmError::Connection {
                message: e.to_string(),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request failed: {e}"),
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = request.model.as_deref().unwrap_or(&self.model);

        let mut body = json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        debug!(url = %url, model = %model, "Sending judge completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json, model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;
    use axum::{Json, Router, routing::post};

    fn config(base_url: String) -> JudgeConfig {
        JudgeConfig {
            enabled: true,
            base_url: Some(base_url),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"message": {"role": "assistant", "content": "{\"score\": 80}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 120}
        });
        let resp = OpenAiCompatibleProvider::parse_response(&body, "gpt-4o-mini").unwrap();
        assert_eq!(resp.text, "{\"score\": 80}");
        assert_eq!(resp.usage.input_tokens, 900);
        assert_eq!(resp.model, "gpt-4o-mini-2024-07-18");
    }

    #[test]
    fn test_parse_response_without_choices() {
        let err = OpenAiCompatibleProvider::parse_response(&json!({}), "m").unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Rate limit reached, try again in 7s"}}"#,
        );
        assert!(matches!(err, LlmError::RateLimited { retry_after_secs: 7 }));
        let err = OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[tokio::test]
    async fn test_complete_against_local_server() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let model = body["model"].as_str().unwrap_or_default().to_string();
                Json(json!({
                    "model": model,
                    "choices": [{"message": {"content": "judged"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 2}
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = OpenAiCompatibleProvider::new_with_key(
            &config(format!("http://{addr}/v1")),
            "test-key".to_string(),
        )
        .unwrap();
        let resp = provider
            .complete(CompletionRequest {
                messages: vec![ChatMessage::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.text, "judged");
        assert_eq!(resp.model, "gpt-4o-mini");
    }
}
