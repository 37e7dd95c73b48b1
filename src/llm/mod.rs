//! LLM provider resolution
//!
//! Turns a caller-supplied [`ModelConfig`] into a validated [`LlmClient`]
//! handle plus the vision flag handed to the planner. No network traffic
//! happens here; invalid settings fail fast as configuration errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::Config;
use crate::utils::{SessionError, SessionResult};

/// Model selection as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    #[serde(alias = "model")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    /// Overrides the provider's default vision capability
    #[serde(default)]
    pub use_vision: Option<bool>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            use_vision: None,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::DeepSeek => "deepseek",
            Provider::Ollama => "ollama",
        }
    }

    /// Environment variable consulted when the config carries no key
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Google => Some("GOOGLE_API_KEY"),
            Provider::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Provider::Ollama => None,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Google => "https://generativelanguage.googleapis.com",
            Provider::DeepSeek => "https://api.deepseek.com",
            Provider::Ollama => "http://localhost:11434",
        }
    }

    /// Whether screenshots should be sent to this model by default
    pub fn supports_vision(&self, model_id: &str) -> bool {
        match self {
            Provider::DeepSeek => false,
            Provider::Ollama => {
                let model = model_id.to_ascii_lowercase();
                model.contains("llava") || model.contains("vision")
            }
            Provider::OpenAi | Provider::Anthropic | Provider::Google => true,
        }
    }
}

impl FromStr for Provider {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            "deepseek" => Ok(Provider::DeepSeek),
            "ollama" => Ok(Provider::Ollama),
            other => Err(SessionError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved, validated LLM handle passed to the planner
#[derive(Clone, PartialEq)]
pub struct LlmClient {
    pub provider: Provider,
    pub model_id: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Resolves model settings into an LLM handle and vision flag
pub trait LlmFactory: Send + Sync {
    fn create(&self, config: &ModelConfig) -> SessionResult<(LlmClient, bool)>;
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Default factory: validates settings and reads API keys from the environment
#[derive(Clone)]
pub struct DefaultLlmFactory {
    default_temperature: f64,
    default_max_tokens: u64,
    env: EnvLookup,
}

impl DefaultLlmFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            default_temperature: config.temperature,
            default_max_tokens: config.max_tokens,
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup used for provider API keys
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }
}

impl Default for DefaultLlmFactory {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl LlmFactory for DefaultLlmFactory {
    fn create(&self, config: &ModelConfig) -> SessionResult<(LlmClient, bool)> {
        let provider: Provider = config.provider.parse()?;

        let model_id = config.model_id.trim();
        if model_id.is_empty() {
            return Err(SessionError::InvalidConfig("model_id must not be empty".into()));
        }

        let temperature = config.temperature.unwrap_or(self.default_temperature);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(SessionError::InvalidConfig(format!(
                "temperature must be within [0, 2], got {}",
                temperature
            )));
        }

        let max_tokens = config.max_tokens.unwrap_or(self.default_max_tokens);
        if max_tokens == 0 {
            return Err(SessionError::InvalidConfig("max_tokens must be positive".into()));
        }

        let api_key = match provider.api_key_env() {
            Some(env_name) => {
                let key = config
                    .api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| (self.env)(env_name).filter(|k| !k.trim().is_empty()))
                    .ok_or_else(|| {
                        SessionError::MissingApiKey(format!(
                            "{} (set api_key or {})",
                            provider, env_name
                        ))
                    })?;
                Some(key)
            }
            None => config.api_key.clone(),
        };

        let use_vision = config
            .use_vision
            .unwrap_or_else(|| provider.supports_vision(model_id));

        let client = LlmClient {
            provider,
            model_id: model_id.to_string(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            temperature,
            max_tokens,
        };

        Ok((client, use_vision))
    }
}

/// Resolve a model config with the default factory
pub fn create_llm(config: &ModelConfig) -> SessionResult<(LlmClient, bool)> {
    DefaultLlmFactory::default().create(config)
}
