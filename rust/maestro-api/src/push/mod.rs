//! Push transport.
//!
//! Subscribers attach over a bidirectional channel (WebSocket) and receive
//! one JSON envelope per frame: `{type, task_id, ts, data}`. The
//! [`manager::ConnectionManager`] owns subscriber lifecycle and delivery;
//! [`ws`] adapts axum WebSockets onto the manager's sink seam.

pub mod manager;
pub mod ws;

pub use manager::{BroadcastReport, ConnectionManager, ConnectionManagerConfig, PushSink, SendOutcome};

use serde::{Deserialize, Serialize};

use crate::events::BusEvent;

/// Why a subscriber was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The client closed the channel or asked to disconnect.
    Explicit,
    /// A newer subscriber claimed the same `client_id` (last-writer-wins).
    Replaced,
    /// No traffic within the liveness deadline.
    Timeout,
    /// The transport reported a permanent write error.
    SinkError,
    /// A terminal frame could not be enqueued within its deadline.
    Unhealthy,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::Explicit => "explicit",
            Self::Replaced => "replaced",
            Self::Timeout => "timeout",
            Self::SinkError => "sink_error",
            Self::Unhealthy => "unhealthy",
        };
        write!(f, "{token}")
    }
}

/// One push-channel frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type, e.g. `progress` or `workflow.completed`.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Workflow this frame belongs to; empty for connection-level frames.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_id: String,
    /// Emission time, RFC 3339.
    pub ts: String,
    /// Per-type payload.
    pub data: serde_json::Value,
}

impl Frame {
    /// Build a frame with the current timestamp.
    #[must_use]
    pub fn new(frame_type: &str, task_id: &str, data: serde_json::Value) -> Self {
        Self {
            frame_type: frame_type.to_string(),
            task_id: task_id.to_string(),
            ts: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// A heartbeat frame (no task association).
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new("heartbeat", "", serde_json::json!({}))
    }

    /// Reply to a client ping.
    #[must_use]
    pub fn pong() -> Self {
        Self::new("pong", "", serde_json::json!({}))
    }

    /// Map a bus event into its push-channel frame, if it has one.
    ///
    /// Connection lifecycle events stay internal and produce no frame.
    #[must_use]
    pub fn from_event(event: &BusEvent) -> Option<Self> {
        let frame = match event {
            BusEvent::WorkflowStarted {
                workflow_id,
                initial_task,
                estimated_steps,
                ..
            } => Self::new(
                "workflow.started",
                workflow_id,
                serde_json::json!({
                    "initial_task": initial_task,
                    "estimated_steps": estimated_steps,
                }),
            ),
            BusEvent::StepStarted {
                workflow_id,
                step_index,
                description,
                kind,
                ..
            } => Self::new(
                "workflow.step.started",
                workflow_id,
                serde_json::json!({
                    "step_index": step_index,
                    "description": description,
                    "kind": kind,
                }),
            ),
            BusEvent::StepCompleted {
                workflow_id,
                step_index,
                success,
                result,
                error,
                ..
            } => Self::new(
                "workflow.step.completed",
                workflow_id,
                serde_json::json!({
                    "step_index": step_index,
                    "success": success,
                    "result": result,
                    "error": error,
                }),
            ),
            BusEvent::WorkflowCompleted {
                workflow_id,
                summary,
                partial_results_note,
                ..
            } => Self::new(
                "workflow.completed",
                workflow_id,
                serde_json::json!({
                    "summary": summary,
                    "partial_results_note": partial_results_note,
                }),
            ),
            BusEvent::WorkflowFailed {
                workflow_id,
                error,
                partial_results,
                ..
            } => Self::new(
                "workflow.failed",
                workflow_id,
                serde_json::json!({
                    "error_kind": error.kind,
                    "message": error.message,
                    "partial_results": partial_results,
                }),
            ),
            BusEvent::Progress(update) => Self::new(
                "progress",
                &update.task_id,
                serde_json::json!({
                    "stage": update.stage,
                    "progress": update.progress,
                    "execution_type": update.execution_type,
                    "agents": update.agents,
                }),
            ),
            BusEvent::ConnectionOpened { .. } | BusEvent::ConnectionClosed { .. } => return None,
        };
        Some(frame)
    }

    /// Whether this frame ends a workflow stream.
    ///
    /// Terminal frames are exempt from outbox drop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.frame_type.as_str(), "workflow.completed" | "workflow.failed")
    }
}
