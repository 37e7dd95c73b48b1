//! Streaming session controller
//!
//! Owns one agent per call: validates settings, connects the remote browser,
//! wires the translator into the agent, engages the approval gate, launches
//! the run loop in the background and drains the outward queue into the
//! returned stream until the end sentinel, cancellation, the failure
//! threshold or a runtime error.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::gate::ApprovalGate;
use super::message::OutwardMessage;
use super::queue::{QueueItem, outward_queue};
use super::translator::StepTranslator;
use crate::Config;
use crate::agent::registry::ResumeResponse;
use crate::agent::{
    Agent, AgentConfig, AgentControl, AgentHistoryList, AgentResult, PlannerFactory,
    PlannerRequest, SessionRegistry,
};
use crate::browser::{BrowserProvisioner, BrowserSession, BrowserTarget, CdpProvisioner};
use crate::llm::{DefaultLlmFactory, LlmClient, LlmFactory, ModelConfig};
use crate::utils::{SessionError, SessionResult};

/// Per-call agent settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Step budget; the configured default applies when absent
    #[serde(default)]
    pub steps: Option<usize>,
}

/// One conversation history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Validated inputs of one session
struct PreparedSession {
    llm: LlmClient,
    use_vision: bool,
    task: String,
    steps: usize,
    target: BrowserTarget,
}

/// Session controller shared by all streaming calls
#[derive(Clone)]
pub struct SessionController {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    llm_factory: Arc<dyn LlmFactory>,
    provisioner: Arc<dyn BrowserProvisioner>,
    planners: Arc<dyn PlannerFactory>,
}

impl SessionController {
    /// Controller with the default LLM factory and CDP provisioner
    pub fn new(config: Config, planners: Arc<dyn PlannerFactory>) -> Self {
        let llm_factory = Arc::new(DefaultLlmFactory::new(&config));
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            llm_factory,
            provisioner: Arc::new(CdpProvisioner),
            planners,
        }
    }

    pub fn with_llm_factory(mut self, factory: Arc<dyn LlmFactory>) -> Self {
        self.llm_factory = factory;
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn BrowserProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Release the paused agent of a session
    ///
    /// Never fails: a missing session is reported as an error response.
    pub fn resume_execution(&self, session_id: &str) -> ResumeResponse {
        self.registry.resume(session_id)
    }

    /// Run one agent session and stream its outward messages
    ///
    /// The stream is lazy: nothing happens until it is first polled.
    /// Configuration problems surface as a single `Err` item before any side
    /// effect. Cancellation ends the stream without an error. Dropping the
    /// stream early still stops the agent and closes the browser.
    pub fn run_agent_session(
        &self,
        model_config: ModelConfig,
        settings: AgentSettings,
        history: Vec<ChatMessage>,
        session_id: impl Into<String>,
        cancel: Option<CancellationToken>,
    ) -> impl Stream<Item = SessionResult<OutwardMessage>> + Send + 'static {
        let this = self.clone();
        let session_id = session_id.into();
        let cancel = cancel.unwrap_or_default();

        async_stream::try_stream! {
            info!("🚀 Starting browser agent session {}", session_id);
            let prepared = this.prepare(&model_config, &settings, &history, &session_id)?;

            let browser = this
                .provisioner
                .connect(&prepared.target)
                .await
                .map_err(SessionError::from)?;
            let mut guard = SessionGuard::new(this.registry.clone(), session_id.clone(), browser.clone());

            let (queue, mut receiver) = outward_queue();
            let planner = this
                .planners
                .create_planner(PlannerRequest {
                    task: prepared.task.clone(),
                    llm: prepared.llm,
                    use_vision: prepared.use_vision,
                    browser,
                })
                .map_err(SessionError::from)?;

            let agent = Arc::new(
                Agent::new(
                    &prepared.task,
                    planner,
                    Arc::new(StepTranslator::new(queue.clone())),
                    AgentConfig::from(this.config.as_ref()),
                )
                .map_err(SessionError::from)?,
            );
            info!("🌐 Created agent (use_vision={})", prepared.use_vision);

            guard.attach_agent(agent.clone());
            ApprovalGate::new(&this.registry, &queue).engage(&session_id, agent.clone());
            drop(queue);

            let runner = agent.clone();
            let steps = prepared.steps;
            guard.attach_task(tokio::spawn(async move { runner.run(steps).await }));
            info!("▶️ Started agent task with {} steps", steps);

            let outcome: SessionResult<()> = loop {
                if cancel.is_cancelled() {
                    info!("Session {} cancelled", session_id);
                    agent.stop();
                    guard.abort_task();
                    break Ok(());
                }
                if agent.too_many_failures() {
                    warn!("Session {} stopping: agent exceeded its failure threshold", session_id);
                    break Ok(());
                }

                // Once the run loop is gone only already-queued items remain
                let next = match guard.task_mut() {
                    Some(task) => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Next::Cancelled,
                        item = receiver.recv() => item.map_or(Next::Drained, Next::Item),
                        joined = task => Next::TaskDone(joined),
                    },
                    None => receiver.try_recv().map_or(Next::Drained, Next::Item),
                };

                match next {
                    Next::Cancelled => continue,
                    Next::Item(QueueItem::Message(message)) => yield message,
                    Next::Item(QueueItem::EndOfStream) => {
                        debug!("Session {} reached end of stream", session_id);
                        break Ok(());
                    }
                    Next::Drained => break Ok(()),
                    Next::TaskDone(joined) => {
                        guard.clear_task();
                        if let Err(e) = task_outcome(joined) {
                            error!("Agent task for session {} failed: {}", session_id, e);
                            break Err(e);
                        }
                    }
                }
            };

            guard.release().await;
            outcome?;
        }
    }

    /// Validate every input before any side effect happens
    fn prepare(
        &self,
        model_config: &ModelConfig,
        settings: &AgentSettings,
        history: &[ChatMessage],
        session_id: &str,
    ) -> SessionResult<PreparedSession> {
        let (llm, use_vision) = self.llm_factory.create(model_config)?;
        info!("🤖 Resolved model {}/{}", llm.provider, llm.model_id);

        let task = latest_user_task(history)?;

        // A zero budget means "unset", same as an absent one
        let steps = match settings.steps {
            Some(steps) if steps > 0 => steps,
            _ => self.config.default_steps,
        };
        if steps == 0 {
            return Err(SessionError::InvalidConfig(
                "default_steps must be at least 1".into(),
            ));
        }

        let api_key = self
            .config
            .browser
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                SessionError::MissingApiKey(
                    "remote browser (set browser.api_key or STEEL_API_KEY)".into(),
                )
            })?;
        let target = BrowserTarget::new(&self.config.browser.connect_url, api_key, session_id);
        target.cdp_url()?;

        Ok(PreparedSession {
            llm,
            use_vision,
            task,
            steps,
            target,
        })
    }
}

/// Outcome of one consumption-loop wait
enum Next {
    Cancelled,
    Item(QueueItem),
    Drained,
    TaskDone(Result<AgentResult<AgentHistoryList>, JoinError>),
}

/// Task of the session: content of the most recent user message
fn latest_user_task(history: &[ChatMessage]) -> SessionResult<String> {
    let message = history
        .iter()
        .rev()
        .find(|m| m.role.eq_ignore_ascii_case("user"))
        .ok_or_else(|| SessionError::InvalidConfig("history contains no user message".into()))?;

    if message.content.trim().is_empty() {
        return Err(SessionError::InvalidConfig("latest user message is empty".into()));
    }
    Ok(message.content.clone())
}

fn task_outcome(joined: Result<AgentResult<AgentHistoryList>, JoinError>) -> SessionResult<()> {
    match joined {
        Ok(Ok(history)) => {
            debug!("Agent task finished after {} steps", history.steps.len());
            Ok(())
        }
        Ok(Err(e)) => Err(SessionError::from(e)),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(SessionError::Agent(format!("agent task panicked: {}", e))),
    }
}

/// Scoped session resources: agent, background task, registry entry and
/// browser connection
///
/// `release()` is the normal exit. If the stream is dropped before that, the
/// `Drop` impl stops the agent and spawns the browser close.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
    browser: Option<Arc<dyn BrowserSession>>,
    agent: Option<Arc<Agent>>,
    task: Option<JoinHandle<AgentResult<AgentHistoryList>>>,
}

impl SessionGuard {
    fn new(
        registry: Arc<SessionRegistry>,
        session_id: String,
        browser: Arc<dyn BrowserSession>,
    ) -> Self {
        Self {
            registry,
            session_id,
            browser: Some(browser),
            agent: None,
            task: None,
        }
    }

    fn attach_agent(&mut self, agent: Arc<Agent>) {
        self.agent = Some(agent);
    }

    fn attach_task(&mut self, task: JoinHandle<AgentResult<AgentHistoryList>>) {
        self.task = Some(task);
    }

    fn task_mut(&mut self) -> Option<&mut JoinHandle<AgentResult<AgentHistoryList>>> {
        self.task.as_mut()
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Forget a task handle that has already completed
    fn clear_task(&mut self) {
        self.task = None;
    }

    fn stop_agent(&mut self) {
        if let Some(agent) = self.agent.take() {
            agent.stop();
            let handle: Arc<dyn AgentControl> = agent;
            self.registry.remove_agent(&self.session_id, &handle);
        }
        self.abort_task();
    }

    /// Stop the agent, deregister the session and close the browser
    async fn release(mut self) {
        self.stop_agent();
        if let Some(browser) = self.browser.take()
            && browser.is_open()
        {
            if let Err(e) = browser.close().await {
                warn!("Error closing browser for session {}: {}", self.session_id, e);
            } else {
                info!("Browser closed for session {}", self.session_id);
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stop_agent();

        let Some(browser) = self.browser.take() else {
            return;
        };
        if !browser.is_open() {
            return;
        }

        let session_id = self.session_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = browser.close().await {
                        warn!("Error closing browser for session {}: {}", session_id, e);
                    }
                });
            }
            Err(_) => warn!(
                "No runtime available to close browser for session {}",
                session_id
            ),
        }
    }
}
