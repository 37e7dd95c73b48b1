use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{
    AgentControl, AgentError, AgentHistoryList, AgentObserver, AgentResult, AgentStepEvent,
    StepPlanner,
};
use super::config::AgentConfig;
use super::messaging::{AgentCommand, AgentResponse};
use super::processor::AgentInner;

/// Agent handle for controlling async actor (NOT Clone)
///
/// Share it behind an `Arc`: the run loop, the approval gate and the resume
/// entry point all hold the same handle.
pub struct Agent {
    inner: Arc<AgentInner>,
    command_channel: mpsc::Sender<AgentCommand>,
    response_channel: Mutex<mpsc::Receiver<AgentResponse>>,
    paused: watch::Sender<bool>,
    consecutive_failures: AtomicUsize,

    /// Background processor task handle, aborted on drop
    processor_handle: Option<tokio::task::JoinHandle<()>>,
}

/// Agent implementation
impl Agent {
    /// Create a new agent instance
    ///
    /// Must be called from within a tokio runtime: the step processor is
    /// spawned immediately.
    pub fn new(
        task: &str,
        planner: Arc<dyn StepPlanner>,
        observer: Arc<dyn AgentObserver>,
        config: AgentConfig,
    ) -> AgentResult<Self> {
        if config.max_failures == 0 {
            return Err(AgentError::UnexpectedError(
                "max_failures must be at least 1".into(),
            ));
        }

        // Create channels for command passing
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (resp_tx, resp_rx) = mpsc::channel(32);
        let (paused, _) = watch::channel(false);

        let inner = Arc::new(AgentInner {
            task: task.to_string(),
            planner,
            observer,
            config,
            stop_token: CancellationToken::new(),
        });

        let processor_handle = Self::spawn_agent_processor(Arc::clone(&inner), cmd_rx, resp_tx);

        Ok(Self {
            inner,
            command_channel: cmd_tx,
            response_channel: Mutex::new(resp_rx),
            paused,
            consecutive_failures: AtomicUsize::new(0),
            processor_handle: Some(processor_handle),
        })
    }

    /// Run the agent to perform a task with a maximum number of steps
    ///
    /// Steps are numbered from 1. The loop blocks before each step while the
    /// agent is paused. The observer's `on_step` fires after every successful
    /// step and `on_done` fires once when the loop ends, unless the processor
    /// died underneath it.
    pub async fn run(&self, max_steps: usize) -> AgentResult<AgentHistoryList> {
        let mut history = AgentHistoryList::new();

        for step_number in 1..=max_steps {
            debug!("Running agent step {}/{}", step_number, max_steps);

            if self.is_stop_requested() {
                info!("Agent run stopped as requested");
                break;
            }

            if !self.wait_while_paused().await {
                info!("Agent stopped while paused");
                break;
            }

            match self.run_step(step_number).await {
                Ok(event) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    self.inner.observer.on_step(&event, step_number);

                    let is_done = event.is_done();
                    history.add_step(step_number, event, is_done);

                    if is_done {
                        info!("Agent completed task in {} steps", step_number);
                        break;
                    }
                }
                Err(AgentError::Stopped) => {
                    info!("Agent stopped during step {}", step_number);
                    break;
                }
                Err(e @ AgentError::ChannelClosed(_)) => {
                    error!("Agent processor unavailable: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(
                        "Agent step {} failed ({}/{}): {}",
                        step_number, failures, self.inner.config.max_failures, e
                    );
                    if self.too_many_failures() {
                        error!("Stopping due to {} consecutive failures", failures);
                        break;
                    }
                }
            }
        }

        self.inner.observer.on_done(&history);
        Ok(history)
    }

    /// Run a single agent step
    async fn run_step(&self, step_number: usize) -> AgentResult<AgentStepEvent> {
        self.command_channel
            .send(AgentCommand::RunStep { step_number })
            .await
            .map_err(|_| {
                // A stop makes the processor exit and drop its receiver
                if self.is_stop_requested() {
                    AgentError::Stopped
                } else {
                    AgentError::ChannelClosed("Command channel closed".into())
                }
            })?;

        let mut receiver = self.response_channel.lock().await;
        match receiver.recv().await {
            Some(AgentResponse::StepComplete(event)) => Ok(event),
            Some(AgentResponse::Error(e)) => Err(e),
            Some(AgentResponse::Stopped) => Err(AgentError::Stopped),
            None if self.is_stop_requested() => Err(AgentError::Stopped),
            None => Err(AgentError::ChannelClosed("Response channel closed".into())),
        }
    }

    /// Block while paused. Returns `false` if the agent was stopped instead.
    async fn wait_while_paused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            let paused = *rx.borrow_and_update();
            if !paused {
                return true;
            }
            debug!("Agent paused, waiting for resume");
            tokio::select! {
                biased;
                _ = self.inner.stop_token.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn is_stop_requested(&self) -> bool {
        self.inner.stop_token.is_cancelled()
    }

    /// Spawn the agent processor task
    fn spawn_agent_processor(
        inner: Arc<AgentInner>,
        mut cmd_rx: mpsc::Receiver<AgentCommand>,
        resp_tx: mpsc::Sender<AgentResponse>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    AgentCommand::RunStep { step_number } => {
                        let response = match inner.process_step(step_number).await {
                            Ok(event) => AgentResponse::StepComplete(event),
                            Err(e) => AgentResponse::Error(e),
                        };

                        if let Err(e) = resp_tx.send(response).await {
                            error!("Failed to send response: {}", e);
                            break;
                        }
                    }
                    AgentCommand::Stop => {
                        // Nobody may be waiting on a response at this point
                        let _ = resp_tx.try_send(AgentResponse::Stopped);
                        break;
                    }
                }
            }
            debug!("Agent processor shutting down cleanly");
        })
    }
}

impl AgentControl for Agent {
    fn pause(&self) {
        info!("Pausing agent");
        self.paused.send_replace(true);
    }

    fn resume(&self) {
        info!("Resuming agent");
        self.paused.send_replace(false);
    }

    /// Request a stop. The current step is abandoned at its next suspension
    /// point and a paused run loop is released.
    fn stop(&self) {
        debug!("Stopping agent processor");
        self.inner.stop_token.cancel();
        let _ = self.command_channel.try_send(AgentCommand::Stop);
    }

    fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    fn too_many_failures(&self) -> bool {
        self.consecutive_failures.load(Ordering::SeqCst) >= self.inner.config.max_failures
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(handle) = self.processor_handle.take() {
            handle.abort();
        }
    }
}
