//! Stable error taxonomy for workflow execution.
//!
//! Every step failure and every terminal workflow failure is expressed with
//! one of the kinds below. The wire representation (snake_case) is part of
//! the push-channel and snapshot contracts and must stay stable.

use serde::{Deserialize, Serialize};

/// Classification of a step or workflow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The resolved tool name is not present in the registry, or tool
    /// resolution declined to pick one.
    ToolNotFound,
    /// A registered tool ran and reported failure, or timed out.
    ToolExecutionFailed,
    /// The tool rejected the supplied argument map.
    InvalidArguments,
    /// An LLM call failed or timed out.
    LlmFailed,
    /// The classifier could not assign a step kind.
    ClassificationFailed,
    /// The workflow was cancelled between steps.
    Cancelled,
    /// The planner produced zero steps.
    EmptyPlan,
    /// A parallel wave could not run because every step of a prior wave failed.
    DependencyUnavailable,
    /// An unexpected failure inside the engine itself.
    InternalError,
}

impl StepErrorKind {
    /// Whether this kind short-circuits the workflow to a failed terminal.
    ///
    /// `LlmFailed` is fatal only during planning; the planner surfaces that
    /// directly, so at step level it is non-fatal here.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::EmptyPlan | Self::DependencyUnavailable | Self::InternalError
        )
    }
}

impl std::fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::ToolNotFound => "tool_not_found",
            Self::ToolExecutionFailed => "tool_execution_failed",
            Self::InvalidArguments => "invalid_arguments",
            Self::LlmFailed => "llm_failed",
            Self::ClassificationFailed => "classification_failed",
            Self::Cancelled => "cancelled",
            Self::EmptyPlan => "empty_plan",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::InternalError => "internal_error",
        };
        write!(f, "{token}")
    }
}

/// A step-level or workflow-level failure with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    /// Failure classification.
    pub kind: StepErrorKind,
    /// Human-readable reason.
    pub message: String,
}

impl StepError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a `ToolNotFound` error.
    #[must_use]
    pub fn tool_not_found(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::ToolNotFound, message)
    }

    /// Shorthand for an `LlmFailed` error.
    #[must_use]
    pub fn llm_failed(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::LlmFailed, message)
    }

    /// Shorthand for a `Cancelled` error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(StepErrorKind::Cancelled, "workflow cancelled")
    }

    /// Whether this error fails the whole workflow.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}
