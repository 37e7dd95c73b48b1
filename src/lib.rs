//! Streaming session controller for approval-gated browser agents
//!
//! Runs one LLM-driven browser agent per call against a remote CDP browser,
//! gates it behind a human approval step and streams its progress as framed
//! text, tool-call and control messages.

pub mod agent;
pub mod browser;
pub mod llm;
pub mod stream;
mod utils;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use utils::constants::{
    DEFAULT_CONNECT_URL, DEFAULT_MAX_ACTIONS_PER_STEP, DEFAULT_MAX_FAILURES, DEFAULT_MAX_STEPS,
    DEFAULT_STEP_TIMEOUT_SECS, ENV_BROWSER_API_KEY, ENV_BROWSER_CONNECT_URL,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    /// Step budget when the caller's agent settings carry none
    #[serde(default = "default_steps")]
    pub default_steps: usize,

    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    #[serde(default = "default_max_actions_per_step")]
    pub max_actions_per_step: usize,

    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    #[serde(default)]
    pub browser: BrowserConfig,
}

/// Remote browser endpoint configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// CDP gateway the session id and API key are appended to
    #[serde(default = "default_connect_url")]
    pub connect_url: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for BrowserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserConfig")
            .field("connect_url", &self.connect_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u64 {
    2048
}
fn default_steps() -> usize {
    DEFAULT_MAX_STEPS
}
fn default_max_failures() -> usize {
    DEFAULT_MAX_FAILURES
}
fn default_max_actions_per_step() -> usize {
    DEFAULT_MAX_ACTIONS_PER_STEP
}
fn default_step_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_connect_url() -> String {
    DEFAULT_CONNECT_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            default_steps: default_steps(),
            max_failures: default_max_failures(),
            max_actions_per_step: default_max_actions_per_step(),
            step_timeout_secs: default_step_timeout_secs(),
            browser: BrowserConfig::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            connect_url: default_connect_url(),
            api_key: None,
        }
    }
}

impl Config {
    /// Overlay the remote browser settings from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Overlay the remote browser settings from an arbitrary lookup
    ///
    /// Blank values are ignored.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup(ENV_BROWSER_API_KEY) {
            self.browser.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_BROWSER_CONNECT_URL) {
            self.browser.connect_url = url;
        }
        self
    }
}

/// Load config from config.yaml in package root
pub fn load_yaml_config() -> anyhow::Result<Config> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

pub use agent::{
    ActionModel, Agent, AgentConfig, AgentControl, AgentError, AgentHistoryList, AgentObserver,
    AgentResult, AgentStepEvent, ApprovalState, CurrentState, PlannerFactory, PlannerRequest,
    ResumeResponse, ResumeStatus, SessionRegistry, StepPlanner,
};
pub use browser::{
    BrowserError, BrowserProvisioner, BrowserResult, BrowserSession, BrowserTarget,
    CdpProvisioner, RemoteBrowser,
};
pub use llm::{DefaultLlmFactory, LlmClient, LlmFactory, ModelConfig, Provider, create_llm};
pub use stream::{
    AgentSettings, ChatMessage, ControlSignal, OutwardMessage, SessionController, ToolCall,
};
pub use utils::{SessionError, SessionResult};
