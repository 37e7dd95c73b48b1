//! Session registry mapping session ids to live agents

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::AgentControl;
use super::session::{AgentSession, ApprovalState};

/// Outcome status of a resume request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStatus {
    Success,
    Error,
}

/// Structured result of a resume request (never raised as an error)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResponse {
    pub status: ResumeStatus,
    pub message: String,
}

impl ResumeResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResumeStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResumeStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResumeStatus::Success
    }
}

/// Registry of live sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, AgentSession>,
}

impl SessionRegistry {
    /// Create a new registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Pause an agent and publish it as the session's live agent
    ///
    /// The agent is paused before the session becomes visible, so a resume
    /// arriving right after publication is never overwritten. An existing
    /// agent for the same id is replaced, stopped and returned.
    pub fn register_paused(
        &self,
        session_id: &str,
        agent: Arc<dyn AgentControl>,
    ) -> Option<AgentSession> {
        let session = AgentSession::paused(agent);
        let previous = self.sessions.insert(session_id.to_string(), session);

        if let Some(old) = &previous {
            warn!("Replacing live agent for session {}", session_id);
            old.agent().stop();
        }

        previous
    }

    /// Current approval state of a session
    pub fn approval_state(&self, session_id: &str) -> Option<ApprovalState> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().approval())
    }

    /// Resume the session's agent
    pub fn resume(&self, session_id: &str) -> ResumeResponse {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.resume();
                info!("Session {} resumed", session_id);
                ResumeResponse::success("Agent resumed")
            }
            None => {
                warn!("Resume requested for unknown session {}", session_id);
                ResumeResponse::error("No agent found")
            }
        }
    }

    /// Remove a session only if it still belongs to the given agent
    ///
    /// Guards against a finishing stream evicting a newer registration that
    /// reused the same session id.
    pub fn remove_agent(&self, session_id: &str, agent: &Arc<dyn AgentControl>) -> bool {
        self.sessions
            .remove_if(session_id, |_, session| session.owns(agent))
            .is_some()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeAgent {
        paused: AtomicBool,
        stopped: AtomicBool,
    }

    impl AgentControl for FakeAgent {
        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
        fn too_many_failures(&self) -> bool {
            false
        }
    }

    #[test]
    fn registered_session_starts_paused_then_resumes() {
        let registry = SessionRegistry::new();
        let agent = Arc::new(FakeAgent::default());
        registry.register_paused("s1", agent.clone());
        assert_eq!(registry.approval_state("s1"), Some(ApprovalState::Paused));
        assert!(agent.is_paused());

        let response = registry.resume("s1");
        assert!(response.is_success());
        assert_eq!(response.message, "Agent resumed");
        assert_eq!(registry.approval_state("s1"), Some(ApprovalState::Resumed));
        assert!(!agent.is_paused());
    }

    /// Records whether its session was already visible when it got paused
    struct VisibilityAgent {
        registry: Arc<SessionRegistry>,
        visible_at_pause: AtomicBool,
        paused: AtomicBool,
    }

    impl AgentControl for VisibilityAgent {
        fn pause(&self) {
            self.visible_at_pause
                .store(self.registry.approval_state("s1").is_some(), Ordering::SeqCst);
            self.paused.store(true, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
        fn stop(&self) {}
        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
        fn too_many_failures(&self) -> bool {
            false
        }
    }

    #[test]
    fn agent_is_paused_before_session_is_published() {
        let registry = Arc::new(SessionRegistry::new());
        let agent = Arc::new(VisibilityAgent {
            registry: registry.clone(),
            visible_at_pause: AtomicBool::new(true),
            paused: AtomicBool::new(false),
        });

        registry.register_paused("s1", agent.clone());
        assert!(!agent.visible_at_pause.load(Ordering::SeqCst));

        // A resume racing in right after publication sticks
        assert!(registry.resume("s1").is_success());
        assert!(!agent.is_paused());
        assert_eq!(registry.approval_state("s1"), Some(ApprovalState::Resumed));
    }

    #[test]
    fn resume_unknown_session_reports_error() {
        let registry = SessionRegistry::new();
        let response = registry.resume("missing");
        assert_eq!(response.status, ResumeStatus::Error);
        assert_eq!(response.message, "No agent found");
    }

    #[test]
    fn register_replaces_and_stops_previous_agent() {
        let registry = SessionRegistry::new();
        let first = Arc::new(FakeAgent::default());
        let second = Arc::new(FakeAgent::default());
        registry.register_paused("s1", first.clone());
        assert!(registry.register_paused("s1", second.clone()).is_some());
        assert!(first.stopped.load(Ordering::SeqCst));
        assert_eq!(registry.len(), 1);

        let first_handle: Arc<dyn AgentControl> = first;
        assert!(!registry.remove_agent("s1", &first_handle));
        let second_handle: Arc<dyn AgentControl> = second;
        assert!(registry.remove_agent("s1", &second_handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn resume_status_serializes_lowercase() {
        let json = serde_json::to_value(ResumeResponse::error("No agent found")).unwrap();
        assert_eq!(json["status"], "error");
    }
}
