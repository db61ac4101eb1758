//! Configuration system for Narrascope.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for the evaluation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Every problem with the configuration (empty when valid).
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let s = &self.scoring;
        if s.tolerance_pct <= 0.0 {
            problems.push("scoring.tolerance_pct must be positive".to_string());
        }
        if s.price_tolerance_pct <= 0.0 {
            problems.push("scoring.price_tolerance_pct must be positive".to_string());
        }
        if s.price_tolerance_pct > s.tolerance_pct {
            problems.push(
                "scoring.price_tolerance_pct should not exceed scoring.tolerance_pct".to_string(),
            );
        }
        if !(0.0..=100.0).contains(&s.percentile_window) {
            problems.push("scoring.percentile_window must be within 0-100".to_string());
        }
        let c = &s.compliance;
        if c.min_lines > c.max_lines {
            problems.push("scoring.compliance.min_lines exceeds max_lines".to_string());
        }
        if c.min_words > c.max_words {
            problems.push("scoring.compliance.min_words exceeds max_words".to_string());
        }
        if !(0.0..=1.0).contains(&c.min_language_ratio) {
            problems.push("scoring.compliance.min_language_ratio must be within 0-1".to_string());
        }
        if s.cost.budget_usd_per_call <= 0.0 {
            problems.push("scoring.cost.budget_usd_per_call must be positive".to_string());
        }
        if self.judge.enabled && self.judge.model.trim().is_empty() {
            problems.push("judge.model is required when the judge is enabled".to_string());
        }
        if self.judge.timeout_secs == 0 {
            problems.push("judge.timeout_secs must be at least 1".to_string());
        }
        if self.trace.enabled && self.trace.host.trim().is_empty() {
            problems.push("trace.host is required when trace feedback is enabled".to_string());
        }
        problems
    }

    /// Fail with [`ConfigError::Invalid`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                message: problems.join("; "),
            })
        }
    }
}

/// Language the narrative is expected to be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    #[default]
    English,
    Chinese,
}

/// Tunables shared by the rule-based scorers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Tolerance band for numeric claims, percent of the expected value.
    pub tolerance_pct: f64,
    /// Tighter tolerance band for price-like claims.
    pub price_tolerance_pct: f64,
    /// Maximum distance in percentile points for a percentile claim to match.
    pub percentile_window: f64,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub qos: QosConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tolerance_pct: 2.0,
            price_tolerance_pct: 0.5,
            percentile_window: 5.0,
            compliance: ComplianceConfig::default(),
            cost: CostConfig::default(),
            qos: QosConfig::default(),
        }
    }
}

/// Structural contract enforced by the compliance scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    pub target_language: TargetLanguage,
    /// Minimum share of target-language characters among all letters.
    pub min_language_ratio: f64,
    pub min_lines: usize,
    pub max_lines: usize,
    pub min_words: usize,
    pub max_words: usize,
    /// Internal strategy names that must never be disclosed.
    pub internal_strategy_names: Vec<String>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            target_language: TargetLanguage::English,
            min_language_ratio: 0.5,
            min_lines: 5,
            max_lines: 60,
            min_words: 80,
            max_words: 600,
            internal_strategy_names: vec![
                "alpha_engine".to_string(),
                "mean_reversion_v2".to_string(),
                "momentum_breakout".to_string(),
                "regime_switch_model".to_string(),
                "proprietary signal".to_string(),
            ],
        }
    }
}

/// Budgets and pricing for the cost scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Spend budget per LLM call, in USD. A run may spend this times its LLM calls.
    pub budget_usd_per_call: f64,
    pub token_budget: u64,
    pub call_budget: u32,
    /// Fallback price per million input tokens for unknown models.
    pub default_input_cost_per_million: f64,
    /// Fallback price per million output tokens for unknown models.
    pub default_output_cost_per_million: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            budget_usd_per_call: 0.05,
            token_budget: 20_000,
            call_budget: 3,
            default_input_cost_per_million: 1.0,
            default_output_cost_per_million: 3.0,
        }
    }
}

/// Budgets for the QoS scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosConfig {
    pub db_query_budget: u32,
    /// Budget for LLM calls plus external API calls.
    pub call_budget: u32,
    /// Total latency treated as a probable timeout.
    pub timeout_ms: u64,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            db_query_budget: 10,
            call_budget: 5,
            timeout_ms: 60_000,
        }
    }
}

/// Judge model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Whether the aggregator runs the judge at all.
    pub enabled: bool,
    pub model: String,
    /// Base URL of an OpenAI-compatible endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Local score store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = directories::ProjectDirs::from("dev", "narrascope", "narrascope")
            .map(|d| d.data_dir().join("scores.db"))
            .unwrap_or_else(|| PathBuf::from("narrascope-scores.db"));
        Self {
            enabled: true,
            path,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Remote trace feedback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub enabled: bool,
    pub host: String,
    /// Environment variable holding the public key.
    pub public_key_env: String,
    /// Environment variable holding the secret key.
    pub secret_key_env: String,
    pub timeout_secs: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "https://cloud.langfuse.com".to_string(),
            public_key_env: "LANGFUSE_PUBLIC_KEY".to_string(),
            secret_key_env: "LANGFUSE_SECRET_KEY".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Background coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How long shutdown waits for in-flight evaluations before abandoning them.
    pub shutdown_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive for the stderr layer.
    pub level: String,
    /// Directory for daily-rolling JSON logs; disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_dir: None,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `NARRASCOPE_`)
/// 3. Explicit config file
/// 4. User config (`~/.config/narrascope/config.toml`)
/// 5. Built-in defaults
///
/// An explicit `config_file` must exist. The merged result is validated.
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&EngineConfig>,
) -> Result<EngineConfig, ConfigError> {
    // Load .env file if present so credentials and NARRASCOPE_* vars are visible.
    let _ = dotenvy::dotenv();

    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "narrascope", "narrascope") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // NARRASCOPE_SCORING__TOLERANCE_PCT, NARRASCOPE_JUDGE__ENABLED, etc.
    figment = figment.merge(Env::prefixed("NARRASCOPE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: EngineConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
