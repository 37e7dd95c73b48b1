use crate::Config;
use crate::utils::constants::{
    DEFAULT_MAX_ACTIONS_PER_STEP, DEFAULT_MAX_FAILURES, DEFAULT_STEP_TIMEOUT_SECS,
};

/// Configuration parameters for agent behavior
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Consecutive failed steps tolerated before the run loop gives up
    pub max_failures: usize,
    pub max_actions_per_step: usize,
    pub step_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            max_actions_per_step: DEFAULT_MAX_ACTIONS_PER_STEP,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }
}

impl From<&Config> for AgentConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_failures: config.max_failures,
            max_actions_per_step: config.max_actions_per_step,
            step_timeout_secs: config.step_timeout_secs,
        }
    }
}
