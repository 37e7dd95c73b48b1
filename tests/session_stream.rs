//! End-to-end tests of the streaming session controller, driven with a
//! scripted planner and an in-memory browser provisioner.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use kodegen_browser_stream::{
    ActionModel, AgentError, AgentResult, AgentSettings, AgentStepEvent, ApprovalState,
    BrowserProvisioner, BrowserResult, BrowserSession, BrowserTarget, ChatMessage, Config,
    CurrentState, ModelConfig, OutwardMessage, PlannerFactory, PlannerRequest, ResumeStatus,
    SessionController, SessionError, SessionResult, StepPlanner,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeBrowser {
    endpoint: String,
    open: AtomicBool,
    closes: AtomicUsize,
    steps_driven: AtomicUsize,
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> BrowserResult<()> {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct FakeProvisioner {
    browsers: Mutex<Vec<Arc<FakeBrowser>>>,
}

impl FakeProvisioner {
    fn connections(&self) -> usize {
        self.browsers.lock().unwrap().len()
    }

    fn browser(&self, index: usize) -> Arc<FakeBrowser> {
        self.browsers.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl BrowserProvisioner for FakeProvisioner {
    async fn connect(&self, target: &BrowserTarget) -> BrowserResult<Arc<dyn BrowserSession>> {
        let browser = Arc::new(FakeBrowser {
            endpoint: target.cdp_url()?.to_string(),
            open: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            steps_driven: AtomicUsize::new(0),
        });
        self.browsers.lock().unwrap().push(browser.clone());
        Ok(browser)
    }
}

enum Scripted {
    Step(AgentStepEvent),
    Fail,
    Panic,
    Hang,
}

struct ScriptedPlanner {
    script: Mutex<VecDeque<Scripted>>,
    browser: Arc<dyn BrowserSession>,
}

#[async_trait]
impl StepPlanner for ScriptedPlanner {
    async fn next_step(&self, _task: &str, _step_number: usize) -> AgentResult<AgentStepEvent> {
        let browser = self
            .browser
            .downcast_ref::<FakeBrowser>()
            .ok_or_else(|| AgentError::StepFailed("unexpected browser session".into()))?;
        browser.steps_driven.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Step(event)) => Ok(event),
            Some(Scripted::Fail) => Err(AgentError::StepFailed("element not found".into())),
            Some(Scripted::Panic) => panic!("planner blew up"),
            Some(Scripted::Hang) | None => std::future::pending().await,
        }
    }
}

struct ScriptedPlanners {
    script: Mutex<Option<Vec<Scripted>>>,
    tasks: Mutex<Vec<String>>,
    refuse: bool,
}

impl ScriptedPlanners {
    fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            tasks: Mutex::new(Vec::new()),
            refuse: false,
        })
    }

    fn refusing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            refuse: true,
        })
    }
}

impl PlannerFactory for ScriptedPlanners {
    fn create_planner(&self, request: PlannerRequest) -> AgentResult<Arc<dyn StepPlanner>> {
        if self.refuse {
            return Err(AgentError::PlannerError("no planner for this model".into()));
        }
        self.tasks.lock().unwrap().push(request.task);
        let script = self.script.lock().unwrap().take().unwrap_or_default();
        Ok(Arc::new(ScriptedPlanner {
            script: Mutex::new(script.into()),
            browser: request.browser,
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    controller: SessionController,
    provisioner: Arc<FakeProvisioner>,
    planners: Arc<ScriptedPlanners>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.browser.api_key = Some("steel-test".into());
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with(config: Config, planners: Arc<ScriptedPlanners>) -> Harness {
    init_tracing();
    let provisioner = Arc::new(FakeProvisioner::default());
    let controller =
        SessionController::new(config, planners.clone()).with_provisioner(provisioner.clone());
    Harness {
        controller,
        provisioner,
        planners,
    }
}

fn harness(script: Vec<Scripted>) -> Harness {
    harness_with(test_config(), ScriptedPlanners::new(script))
}

fn model() -> ModelConfig {
    ModelConfig::new("ollama", "llama3.1")
}

fn settings(steps: usize) -> AgentSettings {
    AgentSettings { steps: Some(steps) }
}

fn state(eval: &str, memory: &str, goal: &str) -> CurrentState {
    CurrentState {
        evaluation_previous_goal: eval.into(),
        memory: memory.into(),
        next_goal: goal.into(),
    }
}

fn step(current_state: CurrentState, action: Vec<ActionModel>) -> Scripted {
    Scripted::Step(AgentStepEvent {
        current_state,
        action,
    })
}

fn done(text: &str) -> ActionModel {
    ActionModel::new("done", json!({ "text": text, "success": true }))
}

async fn next_item<S>(stream: &mut S) -> Option<SessionResult<OutwardMessage>>
where
    S: Stream<Item = SessionResult<OutwardMessage>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream stalled")
}

async fn take_messages<S>(stream: &mut S, count: usize) -> Vec<OutwardMessage>
where
    S: Stream<Item = SessionResult<OutwardMessage>> + Unpin,
{
    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        let item = next_item(stream).await.expect("stream ended early");
        messages.push(item.expect("unexpected error item"));
    }
    messages
}

async fn drain<S>(stream: &mut S) -> Vec<SessionResult<OutwardMessage>>
where
    S: Stream<Item = SessionResult<OutwardMessage>> + Unpin,
{
    let mut items = Vec::new();
    while let Some(item) = next_item(stream).await {
        items.push(item);
    }
    items
}

fn assert_gate(messages: &[OutwardMessage]) {
    assert_eq!(messages.len(), 4);
    let calls = messages[0].tool_calls().expect("gate batch first");
    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["print_call", "pause_execution"]);
    assert!(calls.iter().all(|c| c.id.starts_with("tool_call_")));
    assert_eq!(messages[1], OutwardMessage::placeholder(calls[0].id.clone()));
    assert_eq!(messages[2], OutwardMessage::placeholder(calls[1].id.clone()));
    assert!(messages[3].is_stop());
}

/// Wait for spawned cleanup to settle
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approved_single_step_session_streams_to_completion() {
    let h = harness(vec![step(state("", "mem", "goal"), vec![done("X")])]);
    let history = vec![
        ChatMessage::user("an older request"),
        ChatMessage::new("assistant", "sure"),
        ChatMessage::user("find X"),
    ];
    let mut stream = Box::pin(h.controller.run_agent_session(model(), settings(1), history, "s1", None));

    let gate = take_messages(&mut stream, 4).await;
    assert_gate(&gate);
    assert_eq!(
        h.controller.registry().approval_state("s1"),
        Some(ApprovalState::Paused)
    );

    let response = h.controller.resume_execution("s1");
    assert_eq!(response.status, ResumeStatus::Success);
    assert_eq!(response.message, "Agent resumed");

    let rest: Vec<OutwardMessage> = drain(&mut stream)
        .await
        .into_iter()
        .map(|item| item.unwrap())
        .collect();
    assert_eq!(
        rest,
        vec![
            OutwardMessage::text("mem"),
            OutwardMessage::stop(),
            OutwardMessage::text("goal"),
            OutwardMessage::stop(),
            OutwardMessage::text("X"),
            OutwardMessage::stop(),
            OutwardMessage::ToolCallBatch { tool_calls: vec![] },
            OutwardMessage::stop(),
        ]
    );

    assert_eq!(*h.planners.tasks.lock().unwrap(), vec!["find X".to_string()]);
    let browser = h.provisioner.browser(0);
    assert!(browser.endpoint.contains("apiKey=steel-test"));
    assert!(browser.endpoint.contains("sessionId=s1"));
    assert!(!browser.is_open());
    assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    assert!(h.controller.registry().is_empty());
}

#[tokio::test]
async fn later_steps_with_evaluation_report_only_previous_goal() {
    let h = harness(vec![
        step(
            state("", "m1", "g1"),
            vec![ActionModel::new(
                "go_to_url",
                json!({ "url": "https://example.com", "new_tab": null }),
            )],
        ),
        step(state("Success", "m2", "g2"), vec![]),
        step(state("Found it", "m3", "g3"), vec![done("ignored")]),
    ]);
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(5),
        vec![ChatMessage::user("look around")],
        "s2",
        None,
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    h.controller.resume_execution("s2");

    let rest: Vec<OutwardMessage> = drain(&mut stream)
        .await
        .into_iter()
        .map(|item| item.unwrap())
        .collect();

    // step 1: memory, goal, one call + placeholder
    let calls = rest[4].tool_calls().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "go_to_url");
    assert!(!calls[0].args.contains_key("new_tab"));
    assert_eq!(rest[5], OutwardMessage::placeholder(calls[0].id.clone()));
    assert!(rest[6].is_stop());

    // step 2 still reports in full
    assert_eq!(rest[7], OutwardMessage::text("m2"));
    assert_eq!(rest[11], OutwardMessage::ToolCallBatch { tool_calls: vec![] });
    assert!(rest[12].is_stop());

    // step 3 exits early
    assert_eq!(
        &rest[13..],
        &[OutwardMessage::text("Previous Goal: Found it"), OutwardMessage::stop()]
    );
}

#[tokio::test]
async fn cancel_before_first_poll_yields_nothing() {
    let h = harness(vec![step(state("", "mem", "goal"), vec![done("X")])]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(1),
        vec![ChatMessage::user("task")],
        "s3",
        Some(cancel),
    ));

    assert!(next_item(&mut stream).await.is_none());
    assert!(!h.provisioner.browser(0).is_open());
    assert!(h.controller.registry().is_empty());
}

#[tokio::test]
async fn cancel_while_waiting_ends_stream_without_error() {
    let h = harness(vec![Scripted::Hang]);
    let cancel = CancellationToken::new();
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(3),
        vec![ChatMessage::user("task")],
        "s4",
        Some(cancel.clone()),
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    h.controller.resume_execution("s4");

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });

    assert!(next_item(&mut stream).await.is_none());
    canceller.await.unwrap();
    assert_eq!(h.provisioner.browser(0).closes.load(Ordering::SeqCst), 1);
    assert!(h.controller.registry().is_empty());
}

#[tokio::test]
async fn configuration_errors_fail_before_side_effects() {
    let mut no_key = test_config();
    no_key.browser.api_key = None;
    let h = harness_with(no_key, ScriptedPlanners::new(vec![]));
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(1),
        vec![ChatMessage::user("task")],
        "s5",
        None,
    ));
    let items = drain(&mut stream).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(SessionError::MissingApiKey(_))));
    assert_eq!(h.provisioner.connections(), 0);

    let h = harness(vec![]);
    let mut stream = Box::pin(h.controller.run_agent_session(
        ModelConfig::new("mystery-ai", "m1"),
        settings(1),
        vec![ChatMessage::user("task")],
        "s5",
        None,
    ));
    let err = next_item(&mut stream).await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::UnsupportedProvider(_)));
    assert!(next_item(&mut stream).await.is_none());

    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(1),
        vec![ChatMessage::new("assistant", "hello")],
        "s5",
        None,
    ));
    let err = next_item(&mut stream).await.unwrap().unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(h.provisioner.connections(), 0);
    assert!(h.planners.tasks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resume_without_session_reports_error() {
    let h = harness(vec![]);
    let response = h.controller.resume_execution("nobody");
    assert_eq!(response.status, ResumeStatus::Error);
    assert!(!response.is_success());
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "status": "error", "message": "No agent found" })
    );
}

#[tokio::test]
async fn failure_threshold_ends_stream_cleanly() {
    let mut config = test_config();
    config.max_failures = 2;
    let h = harness_with(
        config,
        ScriptedPlanners::new(vec![Scripted::Fail, Scripted::Fail, Scripted::Hang]),
    );
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(10),
        vec![ChatMessage::user("task")],
        "s6",
        None,
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    h.controller.resume_execution("s6");

    let rest = drain(&mut stream).await;
    assert!(rest.is_empty());
    assert!(!h.provisioner.browser(0).is_open());
}

#[tokio::test]
async fn panicking_planner_surfaces_agent_error() {
    let h = harness(vec![Scripted::Panic]);
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(3),
        vec![ChatMessage::user("task")],
        "s7",
        None,
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    h.controller.resume_execution("s7");

    let rest = drain(&mut stream).await;
    assert_eq!(rest.len(), 1);
    assert!(matches!(rest[0], Err(SessionError::Agent(_))));
    assert!(!h.provisioner.browser(0).is_open());
    assert!(h.controller.registry().is_empty());
}

#[tokio::test]
async fn planner_construction_failure_closes_browser() {
    let h = harness_with(test_config(), ScriptedPlanners::refusing());
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(3),
        vec![ChatMessage::user("task")],
        "s8",
        None,
    ));

    let err = next_item(&mut stream).await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Agent(_)));
    assert!(next_item(&mut stream).await.is_none());

    settle().await;
    assert!(!h.provisioner.browser(0).is_open());
    assert!(h.controller.registry().is_empty());
}

#[tokio::test]
async fn dropping_the_stream_stops_agent_and_closes_browser() {
    let h = harness(vec![Scripted::Hang]);
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(3),
        vec![ChatMessage::user("task")],
        "s9",
        None,
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    assert_eq!(h.controller.registry().len(), 1);
    drop(stream);

    settle().await;
    assert!(h.controller.registry().is_empty());
    assert_eq!(h.provisioner.browser(0).closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_steps_falls_back_to_configured_default() {
    let mut config = test_config();
    config.default_steps = 1;
    let h = harness_with(
        config,
        ScriptedPlanners::new(vec![
            step(state("", "first", "next"), vec![]),
            step(state("", "second", "next"), vec![]),
        ]),
    );
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(0),
        vec![ChatMessage::user("task")],
        "s10",
        None,
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    h.controller.resume_execution("s10");

    let rest = drain(&mut stream).await;
    assert_eq!(rest.len(), 6);
    assert_eq!(
        rest[0].as_ref().unwrap(),
        &OutwardMessage::text("first")
    );
}

#[tokio::test]
async fn planner_drives_the_provisioned_browser() {
    let h = harness(vec![
        step(state("", "m1", "g1"), vec![]),
        step(state("", "m2", "g2"), vec![done("ok")]),
    ]);
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(5),
        vec![ChatMessage::user("task")],
        "s11",
        None,
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    assert_eq!(h.provisioner.browser(0).steps_driven.load(Ordering::SeqCst), 0);
    h.controller.resume_execution("s11");

    let rest = drain(&mut stream).await;
    assert!(rest.iter().all(|item| item.is_ok()));
    let browser = h.provisioner.browser(0);
    assert_eq!(browser.steps_driven.load(Ordering::SeqCst), 2);
    assert!(!browser.is_open());
}

#[tokio::test]
async fn failure_threshold_discards_messages_still_queued() {
    let mut config = test_config();
    config.max_failures = 2;
    let h = harness_with(
        config,
        ScriptedPlanners::new(vec![
            step(state("", "mem", "goal"), vec![]),
            Scripted::Fail,
            Scripted::Fail,
        ]),
    );
    let mut stream = Box::pin(h.controller.run_agent_session(
        model(),
        settings(10),
        vec![ChatMessage::user("task")],
        "s12",
        None,
    ));

    assert_gate(&take_messages(&mut stream, 4).await);
    h.controller.resume_execution("s12");

    // Let the run finish without polling so the first step's report stays queued
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.provisioner.browser(0).steps_driven.load(Ordering::SeqCst), 3);

    let rest = drain(&mut stream).await;
    assert!(rest.is_empty());
    assert!(!h.provisioner.browser(0).is_open());
    assert!(h.controller.registry().is_empty());
}
