//! LLM provider abstraction used by the judge.
//!
//! The judge only needs single-shot, non-streaming completions, so the trait is
//! deliberately small. `OpenAiCompatibleProvider` talks to any OpenAI-style
//! `/chat/completions` endpoint; `MockLlmProvider` is the test double.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatibleProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::JudgeConfig;
use crate::error::LlmError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A request to the LLM for completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    /// Overrides the provider's configured model when set.
    pub model: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
            model: None,
        }
    }
}

/// A completion returned by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Build the judge's provider from configuration, or `None` when the judge is disabled.
pub fn create_judge_provider(
    config: &JudgeConfig,
) -> Result<Option<Arc<dyn LlmProvider>>, LlmError> {
    if !config.enabled {
        return Ok(None);
    }
    let provider = OpenAiCompatibleProvider::new(config)?;
    tracing::info!(model = %provider.model_name(), "Judge provider initialized");
    Ok(Some(Arc::new(provider)))
}

/// A mock LLM provider for testing.
///
/// Returns queued outcomes in order; once the queue is empty it answers with a
/// fixed text response.
pub struct MockLlmProvider {
    model: String,
    outcomes: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            outcomes: Mutex::new(Vec::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a MockLlmProvider that returns the given text for its first calls.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        for _ in 0..20 {
            provider.queue_response(Self::text_response(text));
        }
        provider
    }

    /// Sleep before answering, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_outcomes().push(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_outcomes().push(Err(error));
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn lock_outcomes(&self) -> std::sync::MutexGuard<'_, Vec<Result<CompletionResponse, LlmError>>> {
        self.outcomes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = {
            let mut outcomes = self.lock_outcomes();
            (!outcomes.is_empty()).then(|| outcomes.remove(0))
        };
        next.unwrap_or_else(|| Ok(Self::text_response("mock response")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
