//! Workflow domain model and orchestration.
//!
//! A workflow is one instance of `initial_task -> plan -> per-step execution
//! -> aggregated result`. The engine in [`engine`] drives the sequential
//! path; [`multiagent`] is the alternative entry that selects an execution
//! strategy from a complexity score.

pub mod classify;
pub mod engine;
pub mod error;
pub mod executor;
pub mod multiagent;
pub mod planner;
pub mod store;

pub use classify::Classifier;
pub use engine::WorkflowEngine;
pub use error::{StepError, StepErrorKind};
pub use multiagent::MultiAgentFlow;
pub use store::{CancelOutcome, WorkflowStore};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Accepted but not yet picked up by a worker.
    Pending,
    /// Currently executing.
    Running,
    /// Every step succeeded.
    Completed,
    /// A fatal error ended the workflow early.
    Failed,
    /// Finished, but at least one step failed non-fatally.
    PartialSuccess,
}

impl WorkflowStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::PartialSuccess)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::PartialSuccess => write!(f, "partial_success"),
        }
    }
}

/// How a step is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Invokes a registered external tool.
    Tool,
    /// Produced by the LLM alone, using accumulated context.
    Generic,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tool => write!(f, "tool"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// A resolved tool call attached to a tool step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolHint {
    /// Registered tool name.
    pub name: String,
    /// Extracted argument map.
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// One indivisible item in a plan.
///
/// `kind` is assigned once by the classifier and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the plan.
    pub index: usize,
    /// Natural-language step text.
    pub description: String,
    /// Executor selection.
    pub kind: StepKind,
    /// Resolved tool call, when known before execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_hint: Option<ToolHint>,
}

/// Outcome of one executed step.
///
/// Exactly one of `output` / `error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based index of the step this result belongs to.
    pub step_index: usize,
    /// Kind of the executed step.
    pub kind: StepKind,
    /// Whether the step succeeded.
    pub success: bool,
    /// Structured output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure reason on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Wall-clock execution time.
    pub duration_ms: u64,
}

impl StepResult {
    /// Build a successful result.
    #[must_use]
    pub fn ok(step_index: usize, kind: StepKind, output: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            step_index,
            kind,
            success: true,
            output: Some(output),
            error: None,
            duration_ms,
        }
    }

    /// Build a failed result.
    #[must_use]
    pub fn err(step_index: usize, kind: StepKind, error: StepError, duration_ms: u64) -> Self {
        Self {
            step_index,
            kind,
            success: false,
            output: None,
            error: Some(error),
            duration_ms,
        }
    }
}

/// Receipt returned by workflow submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Assigned workflow identifier.
    pub workflow_id: String,
    /// Always `true`; execution problems surface on the push channel.
    pub accepted: bool,
}

/// Immutable view of a workflow record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    /// Workflow identifier.
    pub workflow_id: String,
    /// Submitted task description.
    pub initial_task: String,
    /// Current status.
    pub status: WorkflowStatus,
    /// Ordered plan; empty until planning finishes.
    pub plan: Vec<Step>,
    /// Ordered step results; aligned with `plan` by index.
    pub results: Vec<StepResult>,
    /// Opaque metadata passed through from submission.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Terminal time, once reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal failure, when `status == failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}
