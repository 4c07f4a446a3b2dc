//! In-memory workflow record store.
//!
//! Records are owned by the orchestrator task driving them while running;
//! everyone else reads immutable snapshots. Terminal records are retained
//! for the lifetime of the process so the snapshot endpoint reflects the
//! terminal record verbatim.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::StepError;
use super::{Step, StepResult, WorkflowSnapshot, WorkflowStatus};

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The flag was set; the orchestrator will observe it between steps.
    Cancelling,
    /// The workflow already reached a terminal status; nothing to do.
    AlreadyTerminal,
    /// No workflow with that id.
    NotFound,
}

#[derive(Debug, Clone)]
struct WorkflowRecord {
    workflow_id: String,
    initial_task: String,
    status: WorkflowStatus,
    plan: Vec<Step>,
    results: Vec<StepResult>,
    metadata: HashMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<StepError>,
    cancel_requested: bool,
}

/// Registry of workflow records keyed by id.
#[derive(Debug, Default)]
pub struct WorkflowStore {
    records: RwLock<HashMap<String, WorkflowRecord>>,
}

impl WorkflowStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending workflow and return its id.
    pub async fn create(
        &self,
        initial_task: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> String {
        let workflow_id = Uuid::new_v4().to_string();
        let record = WorkflowRecord {
            workflow_id: workflow_id.clone(),
            initial_task: initial_task.to_string(),
            status: WorkflowStatus::Pending,
            plan: Vec::new(),
            results: Vec::new(),
            metadata,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            cancel_requested: false,
        };
        self.records.write().await.insert(workflow_id.clone(), record);
        workflow_id
    }

    /// Transition a pending workflow to running.
    pub async fn set_running(&self, workflow_id: &str) {
        if let Some(record) = self.records.write().await.get_mut(workflow_id) {
            if record.status == WorkflowStatus::Pending {
                record.status = WorkflowStatus::Running;
            }
        }
    }

    /// Attach the plan produced by the planner.
    pub async fn set_plan(&self, workflow_id: &str, plan: Vec<Step>) {
        if let Some(record) = self.records.write().await.get_mut(workflow_id) {
            record.plan = plan;
        }
    }

    /// Append one step result.
    pub async fn push_result(&self, workflow_id: &str, result: StepResult) {
        if let Some(record) = self.records.write().await.get_mut(workflow_id) {
            record.results.push(result);
        }
    }

    /// Set the terminal status. The first terminal transition wins; later
    /// calls are ignored.
    pub async fn finalize(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<StepError>,
    ) {
        if let Some(record) = self.records.write().await.get_mut(workflow_id) {
            if record.status.is_terminal() {
                tracing::warn!(
                    workflow_id = %workflow_id,
                    current = %record.status,
                    requested = %status,
                    "ignoring second terminal transition"
                );
                return;
            }
            record.status = status;
            record.completed_at = Some(Utc::now());
            record.error = error;
        }
    }

    /// Request cooperative cancellation.
    pub async fn request_cancel(&self, workflow_id: &str) -> CancelOutcome {
        match self.records.write().await.get_mut(workflow_id) {
            None => CancelOutcome::NotFound,
            Some(record) if record.status.is_terminal() => CancelOutcome::AlreadyTerminal,
            Some(record) => {
                record.cancel_requested = true;
                CancelOutcome::Cancelling
            }
        }
    }

    /// Whether cancellation was requested for this workflow.
    pub async fn cancel_requested(&self, workflow_id: &str) -> bool {
        self.records
            .read()
            .await
            .get(workflow_id)
            .is_some_and(|record| record.cancel_requested)
    }

    /// Immutable snapshot of a record.
    pub async fn snapshot(&self, workflow_id: &str) -> Option<WorkflowSnapshot> {
        self.records.read().await.get(workflow_id).map(|record| WorkflowSnapshot {
            workflow_id: record.workflow_id.clone(),
            initial_task: record.initial_task.clone(),
            status: record.status,
            plan: record.plan.clone(),
            results: record.results.clone(),
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            completed_at: record.completed_at,
            error: record.error.clone(),
        })
    }

    /// Number of known workflows.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no workflows.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
