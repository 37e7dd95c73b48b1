use crate::agent::{AgentError, AgentStepEvent};

/// Agent command enum for internal message passing
pub(super) enum AgentCommand {
    RunStep { step_number: usize },
    Stop,
}

/// Agent response enum for internal message passing
#[derive(Debug)]
pub(super) enum AgentResponse {
    StepComplete(AgentStepEvent),
    Error(AgentError),
    Stopped,
}
