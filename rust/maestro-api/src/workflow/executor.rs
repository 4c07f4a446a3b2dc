//! Step executors.
//!
//! [`GenericExecutor`] asks the LLM to produce a step's output directly,
//! feeding it a compact summary of prior step outputs. [`ToolExecutor`]
//! resolves which registered tool a step needs (deferring to the
//! classifier's hint when present) and invokes it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmClient};
use crate::tools::{ToolErrorKind, ToolRegistry};

use super::error::{StepError, StepErrorKind};
use super::{Step, StepResult};

/// Executes generic steps through the LLM alone.
pub struct GenericExecutor {
    llm: Arc<dyn LlmClient>,
    call_timeout: Duration,
}

impl std::fmt::Debug for GenericExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericExecutor")
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl GenericExecutor {
    /// Create an executor over the given LLM client.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, call_timeout: Duration) -> Self {
        Self { llm, call_timeout }
    }

    /// Produce the step's output. Errors map to `llm_failed` (non-fatal).
    pub async fn execute(&self, step: &Step, accumulated_context: &str) -> StepResult {
        let started = Instant::now();

        let mut prompt = format!("Execute this step and reply with its result:\n{}", step.description);
        if !accumulated_context.is_empty() {
            prompt.push_str("\n\nOutputs of prior steps:\n");
            prompt.push_str(accumulated_context);
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are executing one step of a larger workflow. Reply with the step's \
                 result only, no preamble.",
            ),
            ChatMessage::user(prompt),
        ]);

        let outcome = tokio::time::timeout(self.call_timeout, self.llm.complete(request)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => StepResult::err(
                step.index,
                step.kind,
                StepError::llm_failed("step execution call timed out"),
                duration_ms,
            ),
            Ok(Err(error)) => StepResult::err(
                step.index,
                step.kind,
                StepError::llm_failed(format!("step execution call failed: {error}")),
                duration_ms,
            ),
            Ok(Ok(Completion::Text(text))) => StepResult::ok(
                step.index,
                step.kind,
                serde_json::Value::String(text),
                duration_ms,
            ),
            Ok(Ok(Completion::ToolCall { name, .. })) => StepResult::err(
                step.index,
                step.kind,
                StepError::llm_failed(format!(
                    "generic step expected text, got a `{name}` tool call"
                )),
                duration_ms,
            ),
        }
    }
}

/// Executes tool steps: resolve, look up, invoke, map errors.
pub struct ToolExecutor {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    llm_call_timeout: Duration,
    tool_call_timeout: Duration,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .field("tool_call_timeout", &self.tool_call_timeout)
            .finish()
    }
}

impl ToolExecutor {
    /// Create an executor over the given LLM client and registry.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        llm_call_timeout: Duration,
        tool_call_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            registry,
            llm_call_timeout,
            tool_call_timeout,
        }
    }

    /// Execute a tool step.
    ///
    /// A missing tool or a declined resolution records `tool_not_found`;
    /// that marks an upstream misclassification and the workflow continues.
    pub async fn execute(&self, step: &Step) -> StepResult {
        let started = Instant::now();

        // Defer to the classifier's hint when present; resolution is an LLM
        // round-trip and should happen at most once per confirmed tool step.
        let (name, arguments) = match &step.tool_hint {
            Some(hint) => (hint.name.clone(), hint.arguments.clone()),
            None => match self.resolve(step).await {
                Ok(resolved) => resolved,
                Err(error) => {
                    return StepResult::err(
                        step.index,
                        step.kind,
                        error,
                        started.elapsed().as_millis() as u64,
                    );
                }
            },
        };

        let Some(tool) = self.registry.get(&name) else {
            return StepResult::err(
                step.index,
                step.kind,
                StepError::tool_not_found(format!("no tool named `{name}` is registered")),
                started.elapsed().as_millis() as u64,
            );
        };

        let outcome = tokio::time::timeout(self.tool_call_timeout, tool.execute(arguments)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => StepResult::err(
                step.index,
                step.kind,
                StepError::new(
                    StepErrorKind::ToolExecutionFailed,
                    format!("tool `{name}` timed out"),
                ),
                duration_ms,
            ),
            Ok(Err(error)) => {
                let kind = match error.kind {
                    ToolErrorKind::InvalidArguments => StepErrorKind::InvalidArguments,
                    ToolErrorKind::ExecutionFailed | ToolErrorKind::Unavailable => {
                        StepErrorKind::ToolExecutionFailed
                    }
                };
                StepResult::err(
                    step.index,
                    step.kind,
                    StepError::new(kind, error.message),
                    duration_ms,
                )
            }
            Ok(Ok(output)) => StepResult::ok(step.index, step.kind, output, duration_ms),
        }
    }

    /// Ask the LLM which registered tool fits the step.
    ///
    /// Any failure here, including the LLM declining with prose, maps to
    /// `tool_not_found`: the step was classified as a tool step but no
    /// callable tool could be established.
    async fn resolve(
        &self,
        step: &Step,
    ) -> Result<(String, serde_json::Map<String, serde_json::Value>), StepError> {
        let catalog = self.registry.describe().join("\n");
        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You select tools for workflow steps. Given the available tools and one \
                 step, reply with a tool call naming the tool and its arguments. If no \
                 tool fits, say \"no tool needed\".",
            ),
            ChatMessage::user(format!(
                "Available tools:\n{catalog}\n\nStep:\n{}",
                step.description
            )),
        ]);

        let completion = tokio::time::timeout(self.llm_call_timeout, self.llm.complete(request))
            .await
            .map_err(|_| StepError::tool_not_found("tool resolution timed out"))?
            .map_err(|error| {
                StepError::tool_not_found(format!("tool resolution failed: {error}"))
            })?;

        match completion {
            Completion::ToolCall { name, arguments } => Ok((name, arguments)),
            Completion::Text(reply) => Err(StepError::tool_not_found(format!(
                "resolution declined to pick a tool: {}",
                reply.trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::tools::{Tool, ToolArguments, ToolError};
    use crate::workflow::StepKind;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// LLM stub replaying a scripted sequence of completions.
    struct ScriptedLlm {
        script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    }

    impl ScriptedLlm {
        fn new(script: Vec<Result<Completion, LlmError>>) -> Arc<Self> {
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

    struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _arguments: ToolArguments) -> Result<serde_json::Value, ToolError> {
            Err(ToolError::execution_failed("backend unavailable"))
        }
    }

    fn tool_step(description: &str, hint: Option<crate::workflow::ToolHint>) -> Step {
        Step {
            index: 1,
            description: description.to_string(),
            kind: StepKind::Tool,
            tool_hint: hint,
        }
    }

    #[tokio::test]
    async fn generic_step_returns_llm_text() {
        let llm = ScriptedLlm::new(vec![Ok(Completion::Text("REST is simpler.".to_string()))]);
        let executor = GenericExecutor::new(llm, Duration::from_secs(1));

        let step = Step {
            index: 1,
            description: "Summarize the differences".to_string(),
            kind: StepKind::Generic,
            tool_hint: None,
        };
        let result = executor.execute(&step, "").await;
        assert!(result.success);
        assert_eq!(result.output, Some(serde_json::json!("REST is simpler.")));
    }

    #[tokio::test]
    async fn generic_step_maps_llm_error() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Request("boom".to_string()))]);
        let executor = GenericExecutor::new(llm, Duration::from_secs(1));

        let step = Step {
            index: 2,
            description: "Reflect".to_string(),
            kind: StepKind::Generic,
            tool_hint: None,
        };
        let result = executor.execute(&step, "prior context").await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, StepErrorKind::LlmFailed);
    }

    #[tokio::test]
    async fn hint_skips_resolution() {
        // Script is empty: any LLM call would fail the test.
        let llm = ScriptedLlm::new(vec![]);
        let registry = ToolRegistry::with_builtins();
        let executor = ToolExecutor::new(
            llm,
            registry,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        let mut arguments = ToolArguments::new();
        arguments.insert("expression".to_string(), serde_json::json!("6 * 7"));
        let step = tool_step(
            "Calculate the answer",
            Some(crate::workflow::ToolHint {
                name: "calculator".to_string(),
                arguments,
            }),
        );

        let result = executor.execute(&step).await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["result"], serde_json::json!(42.0));
    }

    #[tokio::test]
    async fn resolution_failure_is_tool_not_found() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Request("provider down".to_string()))]);
        let executor = ToolExecutor::new(
            llm,
            ToolRegistry::with_builtins(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        let result = executor.execute(&tool_step("Search the web", None)).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, StepErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn resolution_decline_is_tool_not_found() {
        let llm = ScriptedLlm::new(vec![Ok(Completion::Text("no tool needed".to_string()))]);
        let executor = ToolExecutor::new(
            llm,
            ToolRegistry::with_builtins(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        let result = executor.execute(&tool_step("Search the web", None)).await;
        assert_eq!(result.error.unwrap().kind, StepErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found() {
        let llm = ScriptedLlm::new(vec![Ok(Completion::ToolCall {
            name: "web_search".to_string(),
            arguments: serde_json::Map::new(),
        })]);
        let executor = ToolExecutor::new(
            llm,
            ToolRegistry::with_builtins(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        let result = executor.execute(&tool_step("Search the web", None)).await;
        assert_eq!(result.error.unwrap().kind, StepErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn tool_failure_maps_to_execution_failed() {
        let llm = ScriptedLlm::new(vec![]);
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool)).unwrap();
        let executor = ToolExecutor::new(
            llm,
            registry,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        let step = tool_step(
            "Use the flaky backend",
            Some(crate::workflow::ToolHint {
                name: "flaky".to_string(),
                arguments: ToolArguments::new(),
            }),
        );
        let result = executor.execute(&step).await;
        assert_eq!(
            result.error.unwrap().kind,
            StepErrorKind::ToolExecutionFailed
        );
    }
}
