//! Workflow engine.
//!
//! Drives a single workflow: plan, classify, dispatch each step to the
//! matching executor, aggregate outcomes, and emit lifecycle and progress
//! events along the way. Submission returns immediately; execution runs on
//! a background task that owns the record until it reaches a terminal
//! status.
//!
//! Progress follows a fixed shape: 5 while planning, 10 once the plan is
//! ready, `10 + floor(85 * completed / total)` through the steps, and 100
//! at "Finalizing". A failed terminal leaves progress wherever it was.

use std::collections::HashMap;
use std::sync::Arc;

use crate::progress::{ProgressBroadcaster, StepPhase};

use super::classify::Classifier;
use super::error::StepError;
use super::executor::{GenericExecutor, ToolExecutor};
use super::planner::Planner;
use super::store::WorkflowStore;
use super::{Step, StepKind, SubmitReceipt, WorkflowStatus};

/// Orchestrates sequential workflow execution.
///
/// Cheap to clone; all clones share the same collaborators and store.
#[derive(Clone)]
pub struct WorkflowEngine {
    planner: Arc<Planner>,
    classifier: Classifier,
    generic: Arc<GenericExecutor>,
    tools: Arc<ToolExecutor>,
    broadcaster: Arc<ProgressBroadcaster>,
    store: Arc<WorkflowStore>,
    max_steps: usize,
    context_char_budget: usize,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("max_steps", &self.max_steps)
            .field("context_char_budget", &self.context_char_budget)
            .finish()
    }
}

impl WorkflowEngine {
    /// Wire an engine from its collaborators.
    #[allow(clippy::too_many_arguments, reason = "explicit dependency injection")]
    #[must_use]
    pub fn new(
        planner: Planner,
        classifier: Classifier,
        generic: GenericExecutor,
        tools: ToolExecutor,
        broadcaster: Arc<ProgressBroadcaster>,
        store: Arc<WorkflowStore>,
        max_steps: usize,
        context_char_budget: usize,
    ) -> Self {
        Self {
            planner: Arc::new(planner),
            classifier,
            generic: Arc::new(generic),
            tools: Arc::new(tools),
            broadcaster,
            store,
            max_steps,
            context_char_budget,
        }
    }

    /// Accept a task and schedule it on a background worker.
    ///
    /// Planning and execution problems never surface here; they arrive on
    /// the push channel and the snapshot endpoint.
    pub async fn start_simple_workflow(
        &self,
        initial_task: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<SubmitReceipt> {
        if initial_task.trim().is_empty() {
            anyhow::bail!("initial_task cannot be empty");
        }

        let workflow_id = self.store.create(initial_task, metadata).await;
        tracing::info!(workflow_id = %workflow_id, "workflow accepted");

        let engine = self.clone();
        let id = workflow_id.clone();
        tokio::spawn(async move {
            engine.execute(&id).await;
        });

        Ok(SubmitReceipt {
            workflow_id,
            accepted: true,
        })
    }

    /// Run the full lifecycle of one workflow.
    async fn execute(&self, workflow_id: &str) {
        let Some(snapshot) = self.store.snapshot(workflow_id).await else {
            tracing::error!(workflow_id = %workflow_id, "workflow record vanished before execution");
            return;
        };
        let initial_task = snapshot.initial_task;

        self.store.set_running(workflow_id).await;
        self.broadcaster
            .broadcast_started(workflow_id, &initial_task, None);
        self.broadcaster
            .broadcast_progress(workflow_id, "Planning", 5.0, None, None);

        let descriptions = match self
            .planner
            .decompose(&initial_task, self.max_steps, None)
            .await
        {
            Ok(descriptions) => descriptions,
            Err(error) => {
                self.fail(workflow_id, error).await;
                return;
            }
        };

        let total = descriptions.len();
        let plan: Vec<Step> = descriptions
            .into_iter()
            .enumerate()
            .map(|(offset, description)| {
                let kind = self.classifier.classify(&description);
                Step {
                    index: offset + 1,
                    description,
                    kind,
                    tool_hint: None,
                }
            })
            .collect();
        self.store.set_plan(workflow_id, plan.clone()).await;
        self.broadcaster
            .broadcast_progress(workflow_id, "Plan ready", 10.0, None, None);

        let mut context = String::new();
        let mut any_failure = false;
        let mut fatal: Option<StepError> = None;

        for step in &plan {
            if self.store.cancel_requested(workflow_id).await {
                fatal = Some(StepError::cancelled());
                break;
            }

            self.broadcaster.broadcast_step(
                workflow_id,
                step.index,
                &step.description,
                StepPhase::Started,
                step.kind,
                None,
                None,
                None,
            );
            let stage = format!("Executing step {} of {total}", step.index);
            self.broadcaster.broadcast_progress(
                workflow_id,
                &stage,
                step_progress(step.index - 1, total),
                None,
                None,
            );

            let result = match step.kind {
                StepKind::Tool => self.tools.execute(step).await,
                StepKind::Generic => self.generic.execute(step, &context).await,
            };

            if result.success {
                if let Some(output) = &result.output {
                    append_context(&mut context, step, output, self.context_char_budget);
                }
            } else {
                any_failure = true;
            }
            let step_fatal = result
                .error
                .as_ref()
                .is_some_and(StepError::is_fatal)
                .then(|| result.error.clone())
                .flatten();

            self.store.push_result(workflow_id, result.clone()).await;
            self.broadcaster.broadcast_step(
                workflow_id,
                step.index,
                &step.description,
                StepPhase::Completed,
                step.kind,
                Some(result.success),
                result.output.clone(),
                result.error.clone(),
            );
            self.broadcaster.broadcast_progress(
                workflow_id,
                &stage,
                step_progress(step.index, total),
                None,
                None,
            );

            if let Some(error) = step_fatal {
                fatal = Some(error);
                break;
            }
        }

        if let Some(error) = fatal {
            self.fail(workflow_id, error).await;
            return;
        }

        let status = if any_failure {
            WorkflowStatus::PartialSuccess
        } else {
            WorkflowStatus::Completed
        };
        self.broadcaster
            .broadcast_progress(workflow_id, "Finalizing", 100.0, None, None);
        self.store.finalize(workflow_id, status, None).await;

        let (summary, note) = self.summarize(workflow_id, status).await;
        self.broadcaster.broadcast_completed(workflow_id, summary, note);
        tracing::info!(workflow_id = %workflow_id, status = %status, "workflow finished");
    }

    /// Terminal failure path: finalize the record, then emit the event.
    async fn fail(&self, workflow_id: &str, error: StepError) {
        tracing::warn!(workflow_id = %workflow_id, error = %error, "workflow failed");
        self.store
            .finalize(workflow_id, WorkflowStatus::Failed, Some(error.clone()))
            .await;

        let partial_results = match self.store.snapshot(workflow_id).await {
            Some(snapshot) if !snapshot.results.is_empty() => {
                serde_json::to_value(&snapshot.results).ok()
            }
            _ => None,
        };
        self.broadcaster
            .broadcast_failed(workflow_id, error, partial_results);
    }

    /// Build the terminal summary and the partial-results note.
    async fn summarize(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> (serde_json::Value, Option<String>) {
        let (total, succeeded) = match self.store.snapshot(workflow_id).await {
            Some(snapshot) => {
                let succeeded = snapshot.results.iter().filter(|result| result.success).count();
                (snapshot.results.len(), succeeded)
            }
            None => (0, 0),
        };

        let summary = serde_json::json!({
            "workflow_id": workflow_id,
            "status": status,
            "total_steps": total,
            "succeeded": succeeded,
            "failed": total - succeeded,
        });
        let note = (status == WorkflowStatus::PartialSuccess).then(|| {
            format!("{} of {total} steps failed; their results are recorded per step", total - succeeded)
        });
        (summary, note)
    }
}

/// Progress through the step loop: `10 + floor(85 * completed / total)`.
pub(crate) fn step_progress(completed: usize, total: usize) -> f32 {
    if total == 0 {
        return 10.0;
    }
    10.0 + ((85 * completed) / total) as f32
}

/// Append one step's output to the rolling context, truncating from the
/// head (oldest first) past the character budget.
pub(crate) fn append_context(
    context: &mut String,
    step: &Step,
    output: &serde_json::Value,
    budget: usize,
) {
    let rendered = stringify_output(output);
    context.push_str(&format!("Step {} - {}: {rendered}\n", step.index, step.description));

    if context.len() > budget {
        let mut cut = context.len() - budget;
        while cut < context.len() && !context.is_char_boundary(cut) {
            cut += 1;
        }
        context.drain(..cut);
    }
}

/// Deterministic stringification of a step output for context building.
pub(crate) fn stringify_output(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_progress_matches_the_documented_curve() {
        // 1-step plan: start at 10, complete at 95
        assert_eq!(step_progress(0, 1), 10.0);
        assert_eq!(step_progress(1, 1), 95.0);

        // 7-step plan from the stage-label example
        assert_eq!(step_progress(2, 7), 34.0);
        assert_eq!(step_progress(7, 7), 95.0);
    }

    #[test]
    fn context_truncates_from_the_head() {
        let step_one = Step {
            index: 1,
            description: "first".to_string(),
            kind: StepKind::Generic,
            tool_hint: None,
        };
        let step_two = Step {
            index: 2,
            description: "second".to_string(),
            kind: StepKind::Generic,
            tool_hint: None,
        };

        let mut context = String::new();
        append_context(&mut context, &step_one, &serde_json::json!("aaaa"), 64);
        append_context(&mut context, &step_two, &serde_json::json!("bbbb"), 64);

        assert!(context.len() <= 64);
        assert!(context.contains("bbbb"), "newest output survives");
        assert!(!context.contains("Step 1"), "oldest entry was truncated");
    }

    #[test]
    fn context_truncation_respects_char_boundaries() {
        let step = Step {
            index: 1,
            description: "unicode".to_string(),
            kind: StepKind::Generic,
            tool_hint: None,
        };
        let mut context = String::new();
        append_context(&mut context, &step, &serde_json::json!("héllo wörld émoji ☂☂☂"), 16);
        assert!(context.len() <= 19, "cut lands on a char boundary near the budget");
        assert!(context.is_char_boundary(0));
    }

    #[test]
    fn tool_outputs_stringify_deterministically() {
        assert_eq!(stringify_output(&serde_json::json!("plain")), "plain");
        assert_eq!(
            stringify_output(&serde_json::json!({"a": 1})),
            "{\"a\":1}"
        );
    }
}
