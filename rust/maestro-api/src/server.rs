//! HTTP server setup and component wiring.
//!
//! `create_app` is the single bootstrap step that instantiates every
//! component and injects the dependencies explicitly. Nothing here is a
//! process-wide singleton: tests build their own wiring the same way.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::llm::{LlmClient, OpenAiCompatClient};
use crate::logging::OpTimer;
use crate::progress::ProgressBroadcaster;
use crate::push::ConnectionManager;
use crate::tools::ToolRegistry;
use crate::workflow::classify::Classifier;
use crate::workflow::executor::{GenericExecutor, ToolExecutor};
use crate::workflow::planner::Planner;
use crate::workflow::{MultiAgentFlow, WorkflowEngine, WorkflowStore};
use crate::{api, log_banner, log_init_step, log_init_warning, log_success, push, AppState};

/// Maestro API version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
pub fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🚀 Maestro API v{VERSION}"),
        format!("Model: {} ({})", config.llm.model, config.llm.base_url)
    );

    // [1/7] Event bus
    let step_timer = OpTimer::new("server", "event_bus");
    let events = Arc::new(EventBus::new());
    log_init_step!(1, 7, "Event Bus", "typed pub/sub ready");
    step_timer.finish();

    // [2/7] Tool registry
    let step_timer = OpTimer::new("server", "tool_registry");
    let tools = ToolRegistry::with_builtins();
    log_init_step!(2, 7, "Tool Registry", format!("{} tools", tools.len()));
    step_timer.finish();

    // [3/7] LLM client
    let step_timer = OpTimer::new("server", "llm_client");
    if config.llm.api_key.is_none() {
        log_init_warning!(
            "No LLM API key configured for {}; completion calls will fail",
            config.llm.base_url
        );
    }
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(config.llm.clone())?);
    log_init_step!(
        3,
        7,
        "LLM Client",
        format!("{} ({})", config.llm.base_url, config.llm.model)
    );
    step_timer.finish();

    // [4/7] Progress broadcaster
    let step_timer = OpTimer::new("server", "progress");
    let progress = Arc::new(ProgressBroadcaster::new(
        Arc::clone(&events),
        config.progress_grace_period(),
    ));
    log_init_step!(4, 7, "Progress Broadcaster", "monotonic per-task streams");
    step_timer.finish();

    // [5/7] Connection manager
    let step_timer = OpTimer::new("server", "connections");
    let connections = ConnectionManager::new(config.connection_manager(), Arc::clone(&events));
    connections.attach_to_bus();
    spawn_liveness_ticker(
        connections.clone(),
        Duration::from_millis(config.transport.heartbeat_interval_ms),
    );
    log_init_step!(
        5,
        7,
        "Connection Manager",
        format!("outbox capacity {}", config.progress.outbox_capacity)
    );
    step_timer.finish();

    // [6/7] Orchestrators
    let step_timer = OpTimer::new("server", "orchestrators");
    let store = Arc::new(WorkflowStore::new());
    let llm_timeout = config.llm_call_timeout();
    let tool_timeout = config.tool_call_timeout();
    let keywords = config.classifier.tool_keywords.clone();

    let engine = WorkflowEngine::new(
        Planner::new(Arc::clone(&llm), llm_timeout),
        Classifier::new(keywords.clone()),
        GenericExecutor::new(Arc::clone(&llm), llm_timeout),
        ToolExecutor::new(Arc::clone(&llm), tools.clone(), llm_timeout, tool_timeout),
        Arc::clone(&progress),
        Arc::clone(&store),
        config.planner.max_steps,
        config.context.char_budget,
    );
    let flow = MultiAgentFlow::new(
        Planner::new(Arc::clone(&llm), llm_timeout),
        Classifier::new(keywords),
        GenericExecutor::new(Arc::clone(&llm), llm_timeout),
        ToolExecutor::new(Arc::clone(&llm), tools, llm_timeout, tool_timeout),
        Arc::clone(&progress),
        Arc::clone(&store),
        config.strategy_thresholds(),
        config.planner.max_steps,
        config.context.char_budget,
    );
    log_init_step!(6, 7, "Orchestrators", "engine + multi-agent flow wired");
    step_timer.finish();

    // [7/7] Router with middleware
    let step_timer = OpTimer::new("server", "router");
    let state = AppState {
        config: Arc::new(config.clone()),
        events,
        progress,
        connections,
        store,
        engine,
        flow,
    };

    let app = Router::new()
        .merge(api::create_router())
        .merge(push::ws::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    log_init_step!(7, 7, "Router", "routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("Maestro API server created");

    Ok(app)
}

/// Periodically disconnect subscribers that missed the liveness deadline.
fn spawn_liveness_ticker(connections: ConnectionManager, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            connections.heartbeat_tick();
        }
    });
}
