//! Shared wiring for integration tests: a scripted LLM client and a full
//! orchestration harness with bus capture, no HTTP involved.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use maestro_api::events::{BusEvent, EventBus, Topic};
use maestro_api::llm::{Completion, CompletionRequest, LlmClient, LlmError};
use maestro_api::progress::ProgressBroadcaster;
use maestro_api::tools::ToolRegistry;
use maestro_api::workflow::classify::Classifier;
use maestro_api::workflow::executor::{GenericExecutor, ToolExecutor};
use maestro_api::workflow::multiagent::StrategyThresholds;
use maestro_api::workflow::planner::Planner;
use maestro_api::workflow::{
    MultiAgentFlow, WorkflowEngine, WorkflowSnapshot, WorkflowStore,
};

/// LLM stub replaying a scripted sequence of completions.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<Completion, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Err(LlmError::Request("script exhausted".to_string())))
    }
}

/// Shorthand for a scripted text completion.
pub fn text(content: &str) -> Result<Completion, LlmError> {
    Ok(Completion::Text(content.to_string()))
}

/// Shorthand for a scripted tool-call completion.
pub fn tool_call(name: &str, arguments: serde_json::Value) -> Result<Completion, LlmError> {
    let arguments = arguments.as_object().cloned().unwrap_or_default();
    Ok(Completion::ToolCall {
        name: name.to_string(),
        arguments,
    })
}

/// Fully wired orchestration stack with captured bus events.
pub struct Harness {
    pub bus: Arc<EventBus>,
    pub events: Arc<Mutex<Vec<BusEvent>>>,
    pub store: Arc<WorkflowStore>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub engine: WorkflowEngine,
    pub flow: MultiAgentFlow,
}

/// Build a harness around the given LLM client and a fresh store.
pub fn harness(llm: Arc<dyn LlmClient>) -> Harness {
    harness_with_store(llm, Arc::new(WorkflowStore::new()))
}

/// Build a harness around the given LLM client and an existing store.
pub fn harness_with_store(llm: Arc<dyn LlmClient>, store: Arc<WorkflowStore>) -> Harness {
    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    for topic in Topic::ALL {
        let capture = Arc::clone(&events);
        bus.subscribe(topic, move |event| {
            capture.lock().push(event.clone());
        });
    }

    let broadcaster = Arc::new(ProgressBroadcaster::new(
        Arc::clone(&bus),
        Duration::from_secs(60),
    ));
    let registry = ToolRegistry::with_builtins();
    let llm_timeout = Duration::from_secs(2);
    let tool_timeout = Duration::from_secs(2);

    let engine = WorkflowEngine::new(
        Planner::new(Arc::clone(&llm), llm_timeout),
        Classifier::default(),
        GenericExecutor::new(Arc::clone(&llm), llm_timeout),
        ToolExecutor::new(Arc::clone(&llm), registry.clone(), llm_timeout, tool_timeout),
        Arc::clone(&broadcaster),
        Arc::clone(&store),
        20,
        4_000,
    );
    let flow = MultiAgentFlow::new(
        Planner::new(Arc::clone(&llm), llm_timeout),
        Classifier::default(),
        GenericExecutor::new(Arc::clone(&llm), llm_timeout),
        ToolExecutor::new(Arc::clone(&llm), registry, llm_timeout, tool_timeout),
        Arc::clone(&broadcaster),
        Arc::clone(&store),
        StrategyThresholds::default(),
        20,
        4_000,
    );

    Harness {
        bus,
        events,
        store,
        broadcaster,
        engine,
        flow,
    }
}

/// Poll until the workflow reaches a terminal status.
pub async fn wait_terminal(store: &WorkflowStore, workflow_id: &str) -> WorkflowSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(snapshot) = store.snapshot(workflow_id).await {
            if snapshot.status.is_terminal() {
                return snapshot;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workflow {workflow_id} did not reach a terminal status in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Compact label for an event, for sequence assertions.
pub fn label(event: &BusEvent) -> String {
    match event {
        BusEvent::WorkflowStarted { .. } => "workflow.started".to_string(),
        BusEvent::StepStarted { step_index, .. } => format!("step.started({step_index})"),
        BusEvent::StepCompleted { step_index, .. } => format!("step.completed({step_index})"),
        BusEvent::WorkflowCompleted { .. } => "workflow.completed".to_string(),
        BusEvent::WorkflowFailed { .. } => "workflow.failed".to_string(),
        BusEvent::Progress(update) => format!("progress({})", update.progress),
        BusEvent::ConnectionOpened { .. } => "connection.opened".to_string(),
        BusEvent::ConnectionClosed { .. } => "connection.closed".to_string(),
    }
}

/// All progress values captured for one task, in emission order.
pub fn progress_values(events: &[BusEvent], task_id: &str) -> Vec<f32> {
    events
        .iter()
        .filter_map(|event| match event {
            BusEvent::Progress(update) if update.task_id == task_id => Some(update.progress),
            _ => None,
        })
        .collect()
}
