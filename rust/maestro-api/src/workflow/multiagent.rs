//! Multi-agent flow orchestrator.
//!
//! An alternative entry point that scores the task's complexity, picks an
//! execution strategy (single, sequential, or parallel waves), and reports
//! coarse, UI-facing progress stages instead of the engine's per-step
//! percentages. The `mcp` execution type exists only as a progress label;
//! routing to an external protocol agent is not implemented.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;

use crate::progress::{ExecutionType, ProgressBroadcaster, StepPhase};

use super::classify::Classifier;
use super::engine::append_context;
use super::error::{StepError, StepErrorKind};
use super::executor::{GenericExecutor, ToolExecutor};
use super::planner::Planner;
use super::store::WorkflowStore;
use super::{Step, StepKind, SubmitReceipt, WorkflowStatus};

const STAGE_INIT: &str = "Inicializando análise da tarefa";
const STAGE_ANALYZE: &str = "Analisando complexidade e requisitos";
const STAGE_SELECT: &str = "Selecionando agentes necessários";
const STAGE_EXECUTE: &str = "Executando";
const STAGE_FINALIZE: &str = "Finalizando execução";
const STAGE_RESULTS: &str = "Processando resultados";
const STAGE_DONE: &str = "Concluído";

/// Complexity thresholds for strategy selection.
#[derive(Debug, Clone, Copy)]
pub struct StrategyThresholds {
    /// Scores at or below this run single-agent.
    pub single_max: f64,
    /// Scores at or above this are eligible for parallel waves.
    pub parallel_min: f64,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            single_max: 0.33,
            parallel_min: 0.66,
        }
    }
}

/// Complexity-driven orchestrator with staged progress reporting.
///
/// Cheap to clone; all clones share the same collaborators and store.
#[derive(Clone)]
pub struct MultiAgentFlow {
    planner: Arc<Planner>,
    classifier: Classifier,
    generic: Arc<GenericExecutor>,
    tools: Arc<ToolExecutor>,
    broadcaster: Arc<ProgressBroadcaster>,
    store: Arc<WorkflowStore>,
    thresholds: StrategyThresholds,
    max_steps: usize,
    context_char_budget: usize,
}

impl std::fmt::Debug for MultiAgentFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiAgentFlow")
            .field("thresholds", &self.thresholds)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl MultiAgentFlow {
    /// Wire a flow from its collaborators.
    #[allow(clippy::too_many_arguments, reason = "explicit dependency injection")]
    #[must_use]
    pub fn new(
        planner: Planner,
        classifier: Classifier,
        generic: GenericExecutor,
        tools: ToolExecutor,
        broadcaster: Arc<ProgressBroadcaster>,
        store: Arc<WorkflowStore>,
        thresholds: StrategyThresholds,
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
            thresholds,
            max_steps,
            context_char_budget,
        }
    }

    /// Accept a task and schedule flow execution on a background worker.
    pub async fn start_flow(
        &self,
        initial_task: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<SubmitReceipt> {
        if initial_task.trim().is_empty() {
            anyhow::bail!("initial_task cannot be empty");
        }

        let workflow_id = self.store.create(initial_task, metadata).await;
        tracing::info!(workflow_id = %workflow_id, "multi-agent flow accepted");

        let flow = self.clone();
        let id = workflow_id.clone();
        tokio::spawn(async move {
            flow.execute(&id).await;
        });

        Ok(SubmitReceipt {
            workflow_id,
            accepted: true,
        })
    }

    async fn execute(&self, workflow_id: &str) {
        let Some(snapshot) = self.store.snapshot(workflow_id).await else {
            tracing::error!(workflow_id = %workflow_id, "flow record vanished before execution");
            return;
        };
        let initial_task = snapshot.initial_task;

        self.store.set_running(workflow_id).await;
        self.broadcaster
            .broadcast_started(workflow_id, &initial_task, None);
        self.broadcaster
            .broadcast_progress(workflow_id, STAGE_INIT, 5.0, None, None);

        let score = complexity_score(&initial_task, &self.classifier);
        self.broadcaster
            .broadcast_progress(workflow_id, STAGE_ANALYZE, 15.0, None, None);
        tracing::debug!(workflow_id = %workflow_id, score, "task complexity scored");

        let single = score <= self.thresholds.single_max;
        let plan_limit = if single { 1 } else { self.max_steps };
        self.broadcaster
            .broadcast_progress(workflow_id, STAGE_SELECT, 25.0, None, None);

        let descriptions = match self
            .planner
            .decompose(&initial_task, plan_limit, None)
            .await
        {
            Ok(descriptions) => descriptions,
            Err(error) => {
                self.fail(workflow_id, error, None).await;
                return;
            }
        };

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

        // Parallel needs at least one wave with two independent-looking steps.
        let waves = partition_waves(&plan);
        let parallel = score >= self.thresholds.parallel_min
            && plan.len() >= 2
            && waves.iter().any(|wave| wave.len() >= 2);

        let (execution_type, execute_progress, agents) = if single {
            (ExecutionType::Single, 40.0, vec!["executor".to_string()])
        } else if parallel {
            (
                ExecutionType::Parallel,
                65.0,
                vec!["planner".to_string(), "worker-pool".to_string()],
            )
        } else {
            (
                ExecutionType::Sequential,
                55.0,
                vec!["planner".to_string(), "executor".to_string()],
            )
        };

        self.broadcaster.broadcast_progress(
            workflow_id,
            STAGE_EXECUTE,
            execute_progress,
            Some(execution_type),
            Some(agents.clone()),
        );

        let (any_failure, fatal) = if parallel {
            self.run_parallel(workflow_id, &plan, &waves).await
        } else {
            self.run_sequential(workflow_id, &plan).await
        };

        if let Some(error) = fatal {
            self.fail(workflow_id, error, Some(execution_type)).await;
            return;
        }

        self.broadcaster.broadcast_progress(
            workflow_id,
            STAGE_FINALIZE,
            85.0,
            Some(execution_type),
            Some(agents.clone()),
        );
        self.broadcaster.broadcast_progress(
            workflow_id,
            STAGE_RESULTS,
            95.0,
            Some(execution_type),
            Some(agents.clone()),
        );

        let status = if any_failure {
            WorkflowStatus::PartialSuccess
        } else {
            WorkflowStatus::Completed
        };
        self.store.finalize(workflow_id, status, None).await;
        self.broadcaster.broadcast_progress(
            workflow_id,
            STAGE_DONE,
            100.0,
            Some(execution_type),
            Some(agents),
        );

        let (summary, note) = self.summarize(workflow_id, status, execution_type).await;
        self.broadcaster.broadcast_completed(workflow_id, summary, note);
        tracing::info!(
            workflow_id = %workflow_id,
            status = %status,
            execution_type = ?execution_type,
            "flow finished"
        );
    }

    /// Ordered execution with rolling context; no per-step percentages.
    async fn run_sequential(
        &self,
        workflow_id: &str,
        plan: &[Step],
    ) -> (bool, Option<StepError>) {
        let mut context = String::new();
        let mut any_failure = false;

        for step in plan {
            if self.store.cancel_requested(workflow_id).await {
                return (any_failure, Some(StepError::cancelled()));
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
            let fatal = result
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

            if fatal.is_some() {
                return (any_failure, fatal);
            }
        }

        (any_failure, None)
    }

    /// Wave execution: every step of a wave starts before any of its
    /// completions is reported; sibling failures do not cancel the wave.
    async fn run_parallel(
        &self,
        workflow_id: &str,
        plan: &[Step],
        waves: &[Vec<usize>],
    ) -> (bool, Option<StepError>) {
        let mut context = String::new();
        let mut any_failure = false;

        for wave in waves {
            if self.store.cancel_requested(workflow_id).await {
                return (any_failure, Some(StepError::cancelled()));
            }

            for &index in wave {
                let step = &plan[index];
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
            }

            let wave_context = context.clone();
            let executions = wave.iter().map(|&index| {
                let step = &plan[index];
                let wave_context = wave_context.clone();
                async move {
                    match step.kind {
                        StepKind::Tool => self.tools.execute(step).await,
                        StepKind::Generic => self.generic.execute(step, &wave_context).await,
                    }
                }
            });
            let results = join_all(executions).await;

            let mut wave_succeeded = 0usize;
            for (&index, result) in wave.iter().zip(results) {
                let step = &plan[index];
                if result.success {
                    wave_succeeded += 1;
                    if let Some(output) = &result.output {
                        append_context(&mut context, step, output, self.context_char_budget);
                    }
                } else {
                    any_failure = true;
                }

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
            }

            if wave_succeeded == 0 {
                return (
                    true,
                    Some(StepError::new(
                        StepErrorKind::DependencyUnavailable,
                        "every step of a wave failed; later waves cannot run",
                    )),
                );
            }
        }

        (any_failure, None)
    }

    async fn fail(
        &self,
        workflow_id: &str,
        error: StepError,
        _execution_type: Option<ExecutionType>,
    ) {
        tracing::warn!(workflow_id = %workflow_id, error = %error, "flow failed");
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

    async fn summarize(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        execution_type: ExecutionType,
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
            "execution_type": execution_type,
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

/// Score task complexity in `[0.0, 1.0]`.
///
/// Signals: length bucket, conjunctions implying multiple subtasks, tool
/// keyword hits, and time-consuming markers.
pub(crate) fn complexity_score(task: &str, classifier: &Classifier) -> f64 {
    let lowered = task.to_lowercase();

    let length_signal = match task.chars().count() {
        0..=79 => 0.0,
        80..=159 => 0.1,
        160..=319 => 0.2,
        _ => 0.3,
    };

    let conjunctions = ["and then", "after that", "followed by", "once that is done"];
    let conjunction_hits = conjunctions
        .iter()
        .filter(|marker| lowered.contains(*marker))
        .count();
    let conjunction_signal = (conjunction_hits as f64 * 0.15).min(0.3);

    let keyword_signal = (classifier.keyword_hits(task) as f64 * 0.1).min(0.2);

    let slow_markers = ["entire", "every", "comprehensive", "complete", "thorough", "exhaustive"];
    let slow_hits = slow_markers
        .iter()
        .filter(|marker| lowered.contains(*marker))
        .count();
    let slow_signal = (slow_hits as f64 * 0.1).min(0.2);

    (length_signal + conjunction_signal + keyword_signal + slow_signal).clamp(0.0, 1.0)
}

/// Partition plan steps into execution waves.
///
/// Step *j* depends on an earlier step *i* when their descriptions share a
/// content token, approximating "references an entity produced by *i*".
/// Absent any overlap signal in the whole plan, the steps stay sequential
/// (one per wave).
pub(crate) fn partition_waves(plan: &[Step]) -> Vec<Vec<usize>> {
    if plan.is_empty() {
        return Vec::new();
    }

    let tokens: Vec<HashSet<String>> = plan
        .iter()
        .map(|step| content_tokens(&step.description))
        .collect();

    let mut any_signal = false;
    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); plan.len()];
    for later in 1..plan.len() {
        for earlier in 0..later {
            if !tokens[later].is_disjoint(&tokens[earlier]) {
                depends_on[later].push(earlier);
                any_signal = true;
            }
        }
    }

    if !any_signal {
        return (0..plan.len()).map(|index| vec![index]).collect();
    }

    let mut level = vec![0usize; plan.len()];
    for index in 0..plan.len() {
        level[index] = depends_on[index]
            .iter()
            .map(|&earlier| level[earlier] + 1)
            .max()
            .unwrap_or(0);
    }

    let wave_count = level.iter().max().copied().unwrap_or(0) + 1;
    let mut waves: Vec<Vec<usize>> = vec![Vec::new(); wave_count];
    for (index, &wave) in level.iter().enumerate() {
        waves[wave].push(index);
    }
    waves
}

/// Lower-cased content tokens (length >= 4, stop words excluded).
fn content_tokens(text: &str) -> HashSet<String> {
    const STOP_WORDS: [&str; 18] = [
        "that", "this", "then", "with", "from", "into", "each", "them", "their", "over",
        "about", "after", "before", "which", "where", "when", "what", "will",
    ];
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 4)
        .filter(|token| !STOP_WORDS.contains(token))
        .map(ToString::to_string)
        .collect()
}
