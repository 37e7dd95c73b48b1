//! Outward message model
//!
//! Every message the caller sees is one of these variants. The JSON form is
//! internally tagged on `type` so transports can forward it unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::utils::constants::TOOL_CALL_ID_PREFIX;

/// One tool invocation inside a [`OutwardMessage::ToolCallBatch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Map<String, Value>,
    pub id: String,
}

impl ToolCall {
    /// Create a call with a fresh `tool_call_<uuid>` id
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args,
            id: format!("{}{}", TOOL_CALL_ID_PREFIX, Uuid::new_v4()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Ends the current displayable chunk
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutwardMessage {
    #[serde(rename = "text")]
    PlainText { content: String },

    #[serde(rename = "tool_calls")]
    ToolCallBatch { tool_calls: Vec<ToolCall> },

    #[serde(rename = "tool_result")]
    ToolResultPlaceholder { tool_call_id: String },

    Control { signal: ControlSignal },
}

impl OutwardMessage {
    pub fn text(content: impl Into<String>) -> Self {
        OutwardMessage::PlainText {
            content: content.into(),
        }
    }

    pub fn stop() -> Self {
        OutwardMessage::Control {
            signal: ControlSignal::Stop,
        }
    }

    pub fn placeholder(tool_call_id: impl Into<String>) -> Self {
        OutwardMessage::ToolResultPlaceholder {
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            OutwardMessage::Control {
                signal: ControlSignal::Stop
            }
        )
    }

    /// Text content, for plain text messages
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutwardMessage::PlainText { content } => Some(content),
            _ => None,
        }
    }

    /// Calls carried by a tool call batch
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            OutwardMessage::ToolCallBatch { tool_calls } => Some(tool_calls),
            _ => None,
        }
    }
}
