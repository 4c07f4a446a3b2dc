//! Tool capability interface and registry.
//!
//! Tools are external capabilities invoked by tool steps. Each tool is
//! side-effect-isolating: one `execute` call does not affect another, and
//! implementations must be safe to call concurrently.

pub mod builtin;
pub mod registry;

pub use registry::ToolRegistry;

use serde::{Deserialize, Serialize};

/// Structured argument map passed to a tool.
pub type ToolArguments = serde_json::Map<String, serde_json::Value>;

/// Classification of a tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The argument map did not match the tool's expectations.
    InvalidArguments,
    /// The tool ran and failed.
    ExecutionFailed,
    /// The tool is temporarily or permanently unavailable.
    Unavailable,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::InvalidArguments => "invalid_arguments",
            Self::ExecutionFailed => "execution_failed",
            Self::Unavailable => "unavailable",
        };
        write!(f, "{token}")
    }
}

/// A tool failure with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    /// Failure classification.
    pub kind: ToolErrorKind,
    /// Human-readable reason.
    pub message: String,
}

impl ToolError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an `InvalidArguments` error.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    /// Shorthand for an `ExecutionFailed` error.
    #[must_use]
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionFailed, message)
    }
}

/// An external capability invocable by tool steps.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique, case-sensitive tool name.
    fn name(&self) -> &str;

    /// Short human-readable description, surfaced to the resolution prompt.
    fn description(&self) -> &str;

    /// Run the tool with a structured argument map.
    async fn execute(&self, arguments: ToolArguments) -> Result<serde_json::Value, ToolError>;
}
