//! Human approval gate
//!
//! Before an agent may act, the session reports a two-call tool batch
//! (announce + pause) through the normal framing, then actually performs both
//! calls: the announcement is logged and the pause blocks the agent and
//! publishes it in the registry until `resume_execution` is called for the
//! session.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::message::ToolCall;
use super::queue::OutwardSender;
use super::translator::frame_tool_calls;
use crate::agent::{AgentControl, SessionRegistry};
use crate::utils::constants::{ANNOUNCE_TOOL, PAUSE_REASON, PAUSE_TOOL, SAFETY_ANNOUNCEMENT};

/// Announcement tool: diagnostic side effect only
pub fn announce(message: &str) -> String {
    info!("🔔 Tool call: {}", message);
    format!("Printed: {}", message)
}

/// Pause tool: blocks the agent, then registers it as the session's paused
/// agent
pub fn pause_execution(
    registry: &SessionRegistry,
    session_id: &str,
    agent: Arc<dyn AgentControl>,
    reason: &str,
) -> String {
    registry.register_paused(session_id, agent);
    info!("⏸️ Pausing execution for session {}: {}", session_id, reason);
    "Agent paused".to_string()
}

/// The announce + pause calls reported to the caller
pub fn gate_tool_calls() -> Vec<ToolCall> {
    vec![
        ToolCall::new(ANNOUNCE_TOOL, single_arg("message", SAFETY_ANNOUNCEMENT)),
        ToolCall::new(PAUSE_TOOL, single_arg("reason", PAUSE_REASON)),
    ]
}

fn single_arg(key: &str, value: &str) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert(key.to_string(), Value::String(value.to_string()));
    args
}

/// Approval gate bound to one session's registry and queue
pub struct ApprovalGate<'a> {
    registry: &'a SessionRegistry,
    queue: &'a OutwardSender,
}

impl<'a> ApprovalGate<'a> {
    pub fn new(registry: &'a SessionRegistry, queue: &'a OutwardSender) -> Self {
        Self { registry, queue }
    }

    /// Report the gate batch, then execute both calls
    pub fn engage(&self, session_id: &str, agent: Arc<dyn AgentControl>) {
        self.queue.push_all(frame_tool_calls(gate_tool_calls()));

        announce(SAFETY_ANNOUNCEMENT);
        pause_execution(self.registry, session_id, agent, PAUSE_REASON);
    }
}
