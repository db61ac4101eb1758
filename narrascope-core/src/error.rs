//! Error types for the Narrascope evaluation engine.
//!
//! Uses `thiserror` for public API error types. Most of these never reach the
//! narrative pipeline: the aggregator turns scorer errors into placeholder scores
//! and the judge turns provider errors into a neutral verdict.

use std::path::PathBuf;

use crate::types::Dimension;

/// Top-level error type for the core library, returned when building an
/// engine from configuration.
#[derive(Debug, thiserror::Error)]
pub enum NarrascopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Errors raised inside a single dimension scorer.
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("{dimension} scorer failed: {message}")]
    Failed { dimension: Dimension, message: String },

    #[error("{dimension} scorer is missing required input: {input}")]
    MissingInput { dimension: Dimension, input: String },

    #[error("{dimension} scorer panicked: {message}")]
    Panicked { dimension: Dimension, message: String },
}

impl ScorerError {
    pub fn failed(dimension: Dimension, message: impl Into<String>) -> Self {
        Self::Failed {
            dimension,
            message: message.into(),
        }
    }

    pub fn missing_input(dimension: Dimension, input: impl Into<String>) -> Self {
        Self::MissingInput {
            dimension,
            input: input.into(),
        }
    }

    /// The dimension whose scorer produced this error.
    pub fn dimension(&self) -> Dimension {
        match self {
            Self::Failed { dimension, .. }
            | Self::MissingInput { dimension, .. }
            | Self::Panicked { dimension, .. } => *dimension,
        }
    }
}

/// Errors from LLM provider interactions (judge model calls).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `NarrascopeError`.
pub type Result<T> = std::result::Result<T, NarrascopeError>;
