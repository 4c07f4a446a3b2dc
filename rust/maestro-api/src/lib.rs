//! Maestro API - Workflow Orchestration and Progress Broadcasting
//!
//! Maestro accepts a free-form natural-language task, decomposes it into an
//! ordered plan, classifies each step, dispatches steps to a generic LLM
//! executor or a tool-invoking executor, aggregates the outcomes, and
//! streams stage-by-stage progress to WebSocket subscribers.
//!
//! # Architecture
//!
//! - [`config`]: configuration loading and validation defaults
//! - [`events`]: typed in-process event bus decoupling producers from consumers
//! - [`progress`]: progress broadcaster with per-task monotonicity
//! - [`push`]: connection manager and WebSocket transport
//! - [`tools`]: tool capability interface and registry
//! - [`llm`]: LLM client abstraction and the OpenAI-compatible adapter
//! - [`workflow`]: planner, classifier, executors, engine, multi-agent flow
//! - [`api`]: HTTP endpoints (submission, snapshot, cancel, health)
//!
//! # Example
//!
//! ```rust,ignore
//! use maestro_api::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config)?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod events;
pub mod llm;
pub mod logging;
pub mod progress;
pub mod push;
pub mod server;
pub mod tools;
pub mod workflow;

use std::sync::Arc;

use config::AppConfig;
use events::EventBus;
use progress::ProgressBroadcaster;
use push::ConnectionManager;
use workflow::{MultiAgentFlow, WorkflowEngine, WorkflowStore};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// In-process event bus.
    pub events: Arc<EventBus>,
    /// Progress broadcaster.
    pub progress: Arc<ProgressBroadcaster>,
    /// Push subscriber manager.
    pub connections: ConnectionManager,
    /// Workflow record store shared by both orchestrators.
    pub store: Arc<WorkflowStore>,
    /// Sequential workflow engine.
    pub engine: WorkflowEngine,
    /// Multi-agent flow orchestrator.
    pub flow: MultiAgentFlow,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("events", &self.events)
            .field("progress", &self.progress)
            .field("connections", &self.connections)
            .field("engine", &self.engine)
            .field("flow", &self.flow)
            .finish()
    }
}
