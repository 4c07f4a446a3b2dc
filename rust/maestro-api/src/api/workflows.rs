//! Workflow submission, snapshot, and cancellation endpoints.
//!
//! Submission always answers 202: planning and execution problems surface
//! on the push channel and through the snapshot endpoint, never in-band.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::workflow::{CancelOutcome, Step, StepError, StepResult, WorkflowSnapshot};
use crate::AppState;

/// Create the workflows router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows/simple", post(submit_simple))
        .route("/workflows/flow", post(submit_flow))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/cancel", post(cancel_workflow))
}

/// Submission body.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Free-form task description.
    pub initial_task: String,
    /// Opaque metadata passed through to the workflow record.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Submission response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub workflow_id: String,
    pub status: &'static str,
}

/// Submit a task to the sequential workflow engine.
async fn submit_simple(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    state
        .engine
        .start_simple_workflow(&body.initial_task, body.metadata)
        .await
        .map(|receipt| {
            (
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    workflow_id: receipt.workflow_id,
                    status: "accepted",
                }),
            )
        })
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)
}

/// Submit a task to the multi-agent flow orchestrator.
async fn submit_flow(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    state
        .flow
        .start_flow(&body.initial_task, body.metadata)
        .await
        .map(|receipt| {
            (
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    workflow_id: receipt.workflow_id,
                    status: "accepted",
                }),
            )
        })
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)
}

/// Workflow snapshot response.
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub workflow_id: String,
    pub status: String,
    pub initial_task: String,
    pub plan: Vec<Step>,
    pub results: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<WorkflowSnapshot> for WorkflowResponse {
    fn from(snapshot: WorkflowSnapshot) -> Self {
        Self {
            workflow_id: snapshot.workflow_id,
            status: snapshot.status.to_string(),
            initial_task: snapshot.initial_task,
            plan: snapshot.plan,
            results: snapshot.results,
            error: snapshot.error,
            started_at: snapshot.created_at.to_rfc3339(),
            completed_at: snapshot.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Fetch a workflow snapshot.
async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    state
        .store
        .snapshot(&workflow_id)
        .await
        .map(|snapshot| Json(WorkflowResponse::from(snapshot)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Cancellation response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub workflow_id: String,
    pub status: &'static str,
}

/// Request cooperative cancellation. Idempotent: cancelling an already
/// terminal workflow is a no-op that still answers 202.
async fn cancel_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), StatusCode> {
    match state.store.request_cancel(&workflow_id).await {
        CancelOutcome::NotFound => Err(StatusCode::NOT_FOUND),
        CancelOutcome::Cancelling => Ok((
            StatusCode::ACCEPTED,
            Json(CancelResponse {
                workflow_id,
                status: "cancelling",
            }),
        )),
        CancelOutcome::AlreadyTerminal => Ok((
            StatusCode::ACCEPTED,
            Json(CancelResponse {
                workflow_id,
                status: "already_terminal",
            }),
        )),
    }
}
