//! Progress broadcasting.
//!
//! Turns orchestrator-facing calls into [`ProgressUpdate`] values and
//! publishes them on the event bus. The broadcaster never knows specific
//! subscribers; the connection manager's bus subscription fans events out.
//!
//! Progress within one task is monotone non-decreasing: a regressive value
//! is clamped to the last published one and logged. The single exception is
//! a failed terminal, which may carry any value. A completed terminal always
//! carries exactly 100.0.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::events::{BusEvent, EventBus};
use crate::workflow::StepError;

/// Execution strategy label attached to progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    /// One agent, one step.
    Single,
    /// Ordered multi-step execution.
    Sequential,
    /// Wave-based concurrent execution.
    Parallel,
    /// Delegated to an external protocol agent (label only).
    Mcp,
}

/// Phase of a step lifecycle report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// The step began executing.
    Started,
    /// The step finished.
    Completed,
}

/// A structured progress record pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Workflow this update belongs to.
    pub task_id: String,
    /// Short human-readable stage label.
    pub stage: String,
    /// Percentage in `[0.0, 100.0]`.
    pub progress: f32,
    /// Execution strategy, when reported by the multi-agent flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<ExecutionType>,
    /// Agent labels active at this stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

/// Per-task broadcaster state for the monotonicity check.
#[derive(Debug, Clone)]
struct TaskProgress {
    last_progress: f32,
    last_stage: String,
    started_at: DateTime<Utc>,
    completed: bool,
}

/// Builds progress updates and routes them through the event bus.
pub struct ProgressBroadcaster {
    bus: Arc<EventBus>,
    tasks: Arc<Mutex<HashMap<String, TaskProgress>>>,
    /// How long terminal task state lingers so late subscribers can catch
    /// the terminal frame.
    grace_period: Duration,
}

impl std::fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("active_tasks", &self.tasks.lock().len())
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

impl ProgressBroadcaster {
    /// Create a broadcaster publishing on the given bus.
    #[must_use]
    pub fn new(bus: Arc<EventBus>, grace_period: Duration) -> Self {
        Self {
            bus,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            grace_period,
        }
    }

    /// Announce that a workflow transitioned to running.
    pub fn broadcast_started(
        &self,
        task_id: &str,
        initial_task: &str,
        estimated_steps: Option<usize>,
    ) {
        self.tasks.lock().insert(
            task_id.to_string(),
            TaskProgress {
                last_progress: 0.0,
                last_stage: String::new(),
                started_at: Utc::now(),
                completed: false,
            },
        );

        self.bus.publish(&BusEvent::WorkflowStarted {
            workflow_id: task_id.to_string(),
            initial_task: initial_task.to_string(),
            estimated_steps,
            timestamp: Utc::now(),
        });
    }

    /// Publish a progress update, clamping regressive values.
    pub fn broadcast_progress(
        &self,
        task_id: &str,
        stage: &str,
        progress: f32,
        execution_type: Option<ExecutionType>,
        agents: Option<Vec<String>>,
    ) {
        let progress = progress.clamp(0.0, 100.0);
        let effective = {
            let mut tasks = self.tasks.lock();
            let entry = tasks.entry(task_id.to_string()).or_insert_with(|| TaskProgress {
                last_progress: 0.0,
                last_stage: String::new(),
                started_at: Utc::now(),
                completed: false,
            });

            let effective = if progress < entry.last_progress {
                tracing::warn!(
                    task_id = %task_id,
                    reported = progress,
                    last = entry.last_progress,
                    "regressive progress clamped"
                );
                entry.last_progress
            } else {
                progress
            };
            entry.last_progress = effective;
            entry.last_stage = stage.to_string();
            effective
        };

        self.bus.publish(&BusEvent::Progress(ProgressUpdate {
            task_id: task_id.to_string(),
            stage: stage.to_string(),
            progress: effective,
            execution_type,
            agents,
            timestamp: Utc::now(),
        }));
    }

    /// Publish a step lifecycle event.
    #[allow(clippy::too_many_arguments, reason = "mirrors the step report shape")]
    pub fn broadcast_step(
        &self,
        task_id: &str,
        step_index: usize,
        description: &str,
        phase: StepPhase,
        kind: crate::workflow::StepKind,
        success: Option<bool>,
        result: Option<serde_json::Value>,
        error: Option<StepError>,
    ) {
        let event = match phase {
            StepPhase::Started => BusEvent::StepStarted {
                workflow_id: task_id.to_string(),
                step_index,
                description: description.to_string(),
                kind,
                timestamp: Utc::now(),
            },
            StepPhase::Completed => BusEvent::StepCompleted {
                workflow_id: task_id.to_string(),
                step_index,
                success: success.unwrap_or(false),
                result,
                error,
                timestamp: Utc::now(),
            },
        };
        self.bus.publish(&event);
    }

    /// Publish the successful terminal event. Progress is forced to 100.0.
    pub fn broadcast_completed(
        &self,
        task_id: &str,
        summary: serde_json::Value,
        partial_results_note: Option<String>,
    ) {
        self.mark_completed(task_id, 100.0);
        self.bus.publish(&BusEvent::WorkflowCompleted {
            workflow_id: task_id.to_string(),
            summary,
            partial_results_note,
            timestamp: Utc::now(),
        });
        self.schedule_purge(task_id);
    }

    /// Publish the failed terminal event.
    pub fn broadcast_failed(
        &self,
        task_id: &str,
        error: StepError,
        partial_results: Option<serde_json::Value>,
    ) {
        let last = self
            .tasks
            .lock()
            .get(task_id)
            .map_or(0.0, |entry| entry.last_progress);
        self.mark_completed(task_id, last);
        self.bus.publish(&BusEvent::WorkflowFailed {
            workflow_id: task_id.to_string(),
            error,
            partial_results,
            timestamp: Utc::now(),
        });
        self.schedule_purge(task_id);
    }

    /// Task ids with broadcaster state that has not reached a terminal.
    #[must_use]
    pub fn active_tasks(&self) -> Vec<String> {
        self.tasks
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.completed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The last progress value published for a task, if tracked.
    #[must_use]
    pub fn last_progress(&self, task_id: &str) -> Option<f32> {
        self.tasks.lock().get(task_id).map(|entry| entry.last_progress)
    }

    fn mark_completed(&self, task_id: &str, progress: f32) {
        let mut tasks = self.tasks.lock();
        let entry = tasks.entry(task_id.to_string()).or_insert_with(|| TaskProgress {
            last_progress: 0.0,
            last_stage: String::new(),
            started_at: Utc::now(),
            completed: false,
        });
        entry.last_progress = progress;
        entry.completed = true;
    }

    fn schedule_purge(&self, task_id: &str) {
        let tasks = Arc::clone(&self.tasks);
        let task_id = task_id.to_string();
        let grace = self.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            tasks.lock().remove(&task_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;

    fn capture_progress(bus: &EventBus) -> Arc<Mutex<Vec<f32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(Topic::ProgressUpdate, move |event| {
            if let BusEvent::Progress(update) = event {
                sink.lock().push(update.progress);
            }
        });
        seen
    }

    #[tokio::test]
    async fn regressive_progress_is_clamped() {
        let bus = Arc::new(EventBus::new());
        let seen = capture_progress(&bus);
        let broadcaster = ProgressBroadcaster::new(Arc::clone(&bus), Duration::from_secs(60));

        broadcaster.broadcast_progress("wf-1", "Planning", 5.0, None, None);
        broadcaster.broadcast_progress("wf-1", "Plan ready", 10.0, None, None);
        broadcaster.broadcast_progress("wf-1", "Glitch", 3.0, None, None);

        assert_eq!(*seen.lock(), vec![5.0, 10.0, 10.0]);
    }

    #[tokio::test]
    async fn tasks_do_not_interfere() {
        let bus = Arc::new(EventBus::new());
        let broadcaster = ProgressBroadcaster::new(Arc::clone(&bus), Duration::from_secs(60));

        broadcaster.broadcast_progress("wf-1", "Executing", 80.0, None, None);
        broadcaster.broadcast_progress("wf-2", "Planning", 5.0, None, None);

        assert_eq!(broadcaster.last_progress("wf-1"), Some(80.0));
        assert_eq!(broadcaster.last_progress("wf-2"), Some(5.0));
    }

    #[tokio::test]
    async fn completed_terminal_forces_one_hundred() {
        let bus = Arc::new(EventBus::new());
        let broadcaster = ProgressBroadcaster::new(Arc::clone(&bus), Duration::from_secs(60));

        broadcaster.broadcast_started("wf-1", "do things", Some(2));
        broadcaster.broadcast_progress("wf-1", "Executing", 40.0, None, None);
        broadcaster.broadcast_completed("wf-1", serde_json::json!({"steps": 2}), None);

        assert_eq!(broadcaster.last_progress("wf-1"), Some(100.0));
        assert!(broadcaster.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn terminal_state_purged_after_grace_period() {
        let bus = Arc::new(EventBus::new());
        let broadcaster = ProgressBroadcaster::new(Arc::clone(&bus), Duration::from_millis(20));

        broadcaster.broadcast_started("wf-1", "task", None);
        broadcaster.broadcast_failed("wf-1", StepError::cancelled(), None);
        assert_eq!(broadcaster.last_progress("wf-1"), Some(0.0));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(broadcaster.last_progress("wf-1"), None);
    }

    #[tokio::test]
    async fn active_tasks_lists_only_running() {
        let bus = Arc::new(EventBus::new());
        let broadcaster = ProgressBroadcaster::new(Arc::clone(&bus), Duration::from_secs(60));

        broadcaster.broadcast_started("wf-1", "a", None);
        broadcaster.broadcast_started("wf-2", "b", None);
        broadcaster.broadcast_completed("wf-2", serde_json::json!({}), None);

        assert_eq!(broadcaster.active_tasks(), vec!["wf-1".to_string()]);
    }
}
