//! Agent step → outward message translation
//!
//! Per step, in order:
//! 1. from step 3 on, a non-empty previous-goal evaluation is reported alone
//!    (`Previous Goal: …` + stop) and nothing else is emitted for that step;
//! 2. otherwise memory + stop, next goal + stop;
//! 3. each `done` action becomes its completion text + stop, every other
//!    action becomes a tool call with null arguments removed;
//! 4. the accumulated tool calls are framed as one batch (possibly empty).

use serde_json::{Map, Value};
use tracing::debug;

use super::message::{OutwardMessage, ToolCall};
use super::queue::OutwardSender;
use crate::agent::{AgentHistoryList, AgentObserver, AgentStepEvent, done_text};
use crate::utils::constants::DONE_ACTION;

/// Steps up to this number always report memory and next goal
const FULL_REPORT_STEPS: usize = 2;

/// Frame a tool call batch: the batch, one placeholder per call id in the
/// same order, then a stop signal.
pub fn frame_tool_calls(calls: Vec<ToolCall>) -> Vec<OutwardMessage> {
    let placeholders: Vec<OutwardMessage> = calls
        .iter()
        .map(|call| OutwardMessage::placeholder(call.id.clone()))
        .collect();

    let mut framed = Vec::with_capacity(placeholders.len() + 2);
    framed.push(OutwardMessage::ToolCallBatch { tool_calls: calls });
    framed.extend(placeholders);
    framed.push(OutwardMessage::stop());
    framed
}

/// Translate one agent step into the messages reported for it
pub fn translate_step(event: &AgentStepEvent, step_number: usize) -> Vec<OutwardMessage> {
    let state = &event.current_state;

    if step_number > FULL_REPORT_STEPS && !state.evaluation_previous_goal.is_empty() {
        return vec![
            OutwardMessage::text(format!("Previous Goal: {}", state.evaluation_previous_goal)),
            OutwardMessage::stop(),
        ];
    }

    let mut messages = vec![
        OutwardMessage::text(state.memory.clone()),
        OutwardMessage::stop(),
        OutwardMessage::text(state.next_goal.clone()),
        OutwardMessage::stop(),
    ];

    let mut calls = Vec::new();
    for action in &event.action {
        for (name, value) in action.populated() {
            if name == DONE_ACTION {
                messages.push(OutwardMessage::text(done_text(value)));
                messages.push(OutwardMessage::stop());
            } else {
                calls.push(ToolCall::new(name, strip_nulls(value)));
            }
        }
    }

    messages.extend(frame_tool_calls(calls));
    messages
}

/// Argument map of an action with null-valued fields removed
fn strip_nulls(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(fields) => fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Map::new(),
    }
}

/// Observer that pushes translated steps onto the outward queue
pub struct StepTranslator {
    queue: OutwardSender,
}

impl StepTranslator {
    pub fn new(queue: OutwardSender) -> Self {
        Self { queue }
    }
}

impl AgentObserver for StepTranslator {
    fn on_step(&self, event: &AgentStepEvent, step_number: usize) {
        let messages = translate_step(event, step_number);
        debug!("Step {} produced {} messages", step_number, messages.len());
        self.queue.push_all(messages);
    }

    fn on_done(&self, history: &AgentHistoryList) {
        debug!("Agent finished after {} steps", history.steps.len());
        self.queue.end();
    }
}
