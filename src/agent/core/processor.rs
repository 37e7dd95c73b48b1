use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::agent::{AgentError, AgentObserver, AgentResult, AgentStepEvent, StepPlanner};
use super::config::AgentConfig;

/// Shared agent state and processing logic (can be Arc-cloned)
pub(super) struct AgentInner {
    pub(super) task: String,
    pub(super) planner: Arc<dyn StepPlanner>,
    pub(super) observer: Arc<dyn AgentObserver>,
    pub(super) config: AgentConfig,
    pub(super) stop_token: CancellationToken,
}

/// Core processing logic
impl AgentInner {
    /// Process a single agent step internally
    pub(super) async fn process_step(&self, step_number: usize) -> AgentResult<AgentStepEvent> {
        if self.stop_token.is_cancelled() {
            return Err(AgentError::Stopped);
        }

        let timeout_secs = self.config.step_timeout_secs;
        let planned = tokio::select! {
            biased;
            _ = self.stop_token.cancelled() => return Err(AgentError::Stopped),
            result = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                self.planner.next_step(&self.task, step_number),
            ) => result,
        };

        let mut event = match planned {
            Ok(result) => result?,
            Err(_) => return Err(AgentError::Timeout(timeout_secs)),
        };

        // Limit the number of actions
        if event.action.len() > self.config.max_actions_per_step {
            warn!(
                "Agent generated {} actions, limiting to {}",
                event.action.len(),
                self.config.max_actions_per_step
            );
            event.action.truncate(self.config.max_actions_per_step);
        }

        Ok(event)
    }
}
