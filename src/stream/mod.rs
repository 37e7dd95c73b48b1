//! Outward message pipeline: framing, queue, approval gate and controller

pub mod controller;
pub mod gate;
pub mod message;
pub mod queue;
pub mod translator;

pub use controller::{AgentSettings, ChatMessage, SessionController};
pub use gate::ApprovalGate;
pub use message::{ControlSignal, OutwardMessage, ToolCall};
pub use queue::{OutwardReceiver, OutwardSender, QueueItem, outward_queue};
pub use translator::{StepTranslator, frame_tool_calls, translate_step};
