mod core;
pub mod registry;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::browser::BrowserSession;
use crate::llm::LlmClient;
use crate::utils::constants::DONE_ACTION;

pub use self::core::{Agent, AgentConfig};
pub use registry::{ResumeResponse, ResumeStatus, SessionRegistry};
pub use session::{AgentSession, ApprovalState};

/// A single proposed action: one action name mapped to its field map.
///
/// Mirrors the wire shape `{"click_element": {"index": 3}}`. Entries that are
/// null or empty are considered unpopulated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionModel(pub Map<String, Value>);

impl ActionModel {
    /// Build an action with a single populated entry
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        let mut map = Map::new();
        map.insert(name.into(), params);
        Self(map)
    }

    /// Populated entries in declaration order
    pub fn populated(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0
            .iter()
            .filter(|(_, value)| is_populated(value))
            .map(|(key, value)| (key.as_str(), value))
    }

    /// True if this action marks the task as complete
    pub fn is_done(&self) -> bool {
        self.populated().any(|(key, _)| key == DONE_ACTION)
    }
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Planner notes attached to every step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    #[serde(default)]
    pub evaluation_previous_goal: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub next_goal: String,
}

/// Read-only view of one agent step, handed to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStepEvent {
    pub current_state: CurrentState,
    #[serde(default)]
    pub action: Vec<ActionModel>,
}

impl AgentStepEvent {
    /// True if any action of this step is `done`
    pub fn is_done(&self) -> bool {
        self.action.iter().any(ActionModel::is_done)
    }

    /// Completion text of the first `done` action, if any
    pub fn done_text(&self) -> Option<String> {
        self.action
            .iter()
            .flat_map(|a| a.populated())
            .find(|(key, _)| *key == DONE_ACTION)
            .map(|(_, value)| done_text(value))
    }
}

/// Extract the completion text carried by a `done` action's fields
pub(crate) fn done_text(value: &Value) -> String {
    match value.get("text") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Planner error: {0}")]
    PlannerError(String),

    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Step timed out after {0}s")]
    Timeout(u64),

    #[error("Agent stopped")]
    Stopped,

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Unexpected error: {0}")]
    UnexpectedError(String),
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// An entry in the agent history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHistory {
    pub step: usize,
    pub output: AgentStepEvent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub is_complete: bool,
}

/// A list of agent history entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentHistoryList {
    pub steps: Vec<AgentHistory>,
}

impl AgentHistoryList {
    /// Create a new agent history list
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Add a step to the history, with explicit completion flag
    pub fn add_step(&mut self, step: usize, output: AgentStepEvent, is_complete: bool) {
        self.steps.push(AgentHistory {
            step,
            output,
            timestamp: chrono::Utc::now(),
            is_complete,
        });
    }

    /// Returns true if any step marks the task as complete
    pub fn is_complete(&self) -> bool {
        self.steps.iter().any(|s| s.is_complete)
    }

    /// Completion text of the last completed step
    pub fn final_result(&self) -> Option<String> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.is_complete)
            .and_then(|last| last.output.done_text())
    }
}

/// Black-box action policy: decides and performs one browser step.
#[async_trait]
pub trait StepPlanner: Send + Sync {
    async fn next_step(&self, task: &str, step_number: usize) -> AgentResult<AgentStepEvent>;
}

/// Everything a planner needs to drive one session
pub struct PlannerRequest {
    pub task: String,
    pub llm: LlmClient,
    pub use_vision: bool,
    pub browser: Arc<dyn BrowserSession>,
}

/// Builds the action policy for a new session
pub trait PlannerFactory: Send + Sync {
    fn create_planner(&self, request: PlannerRequest) -> AgentResult<Arc<dyn StepPlanner>>;
}

/// Step and completion hooks, invoked from the agent's own task
pub trait AgentObserver: Send + Sync {
    fn on_step(&self, event: &AgentStepEvent, step_number: usize);

    fn on_done(&self, history: &AgentHistoryList);
}

/// Control surface shared by the approval gate, the resume entry point and
/// the session controller
pub trait AgentControl: Send + Sync {
    fn pause(&self);

    fn resume(&self);

    fn stop(&self);

    fn is_paused(&self) -> bool;

    fn too_many_failures(&self) -> bool;
}
