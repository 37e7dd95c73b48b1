//! Per-session agent handle and approval state

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AgentControl;

/// Human approval state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// Gate engaged, agent blocked until resumed
    Paused,
    /// Resume received, agent free to run
    Resumed,
}

/// Live agent handle plus its approval state
#[derive(Clone)]
pub struct AgentSession {
    agent: Arc<dyn AgentControl>,
    approval: ApprovalState,
}

impl AgentSession {
    /// Pause the agent and wrap it in a session awaiting approval
    pub fn paused(agent: Arc<dyn AgentControl>) -> Self {
        agent.pause();
        Self {
            agent,
            approval: ApprovalState::Paused,
        }
    }

    pub fn agent(&self) -> &Arc<dyn AgentControl> {
        &self.agent
    }

    pub fn approval(&self) -> ApprovalState {
        self.approval
    }

    /// Release the agent and record the approval
    pub fn resume(&mut self) {
        self.agent.resume();
        self.approval = ApprovalState::Resumed;
    }

    /// Check whether this session wraps the given agent handle
    pub fn owns(&self, agent: &Arc<dyn AgentControl>) -> bool {
        Arc::ptr_eq(&self.agent, agent)
    }
}
