//! Execution lifecycle handlers: create, run, inspect and cancel.
//!
//! `run` is synchronous from the client's point of view: the response carries
//! the finished record. Progress of a long run can be polled through
//! `GET /executions/{id}/status` from another connection meanwhile.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use insightflow_core::workflow::EngineError;
use insightflow_types::workflow::{
    CancelReport, Customization, ExecutionStatusReport, WorkflowExecution,
};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateExecutionRequest {
    pub template_id: String,
    #[serde(default)]
    pub customizations: Option<Customization>,
}

fn execution_links<T: serde::Serialize>(resp: ApiResponse<T>, id: Uuid) -> ApiResponse<T> {
    resp.with_link("self", &format!("/api/v1/executions/{id}"))
        .with_link("status", &format!("/api/v1/executions/{id}/status"))
        .with_link("run", &format!("/api/v1/executions/{id}/run"))
        .with_link("cancel", &format!("/api/v1/executions/{id}/cancel"))
}

/// POST /api/v1/executions - Instantiate a (possibly customized) template.
pub async fn create_execution(
    State(state): State<AppState>,
    Json(body): Json<CreateExecutionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowExecution>>), AppError> {
    let timer = RequestTimer::start();
    if body.template_id.trim().is_empty() {
        return Err(AppError::Validation("template_id must not be empty".to_string()));
    }

    let execution = state
        .engine
        .create_execution(&body.template_id, body.customizations.as_ref())?;
    let id = execution.id;
    Ok((
        StatusCode::CREATED,
        Json(execution_links(timer.success(execution), id)),
    ))
}

/// POST /api/v1/executions/{id}/run - Run to completion and return the record.
///
/// The run is spawned detached so a client disconnect does not abort the
/// steps already dispatched.
pub async fn run_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let timer = RequestTimer::start();
    let engine = state.engine.clone();
    let collaborators = state.collaborators.clone();
    let execution = tokio::spawn(async move { engine.run(id, &collaborators).await })
        .await
        .map_err(|e| AppError::Internal(format!("run task failed: {e}")))??;
    Ok(Json(execution_links(timer.success(execution), id)))
}

/// GET /api/v1/executions/{id} - Full record, active or archived.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let timer = RequestTimer::start();
    let execution = state
        .engine
        .get_execution(id)
        .ok_or(EngineError::UnknownExecution(id))?;
    Ok(Json(execution_links(timer.success(execution), id)))
}

/// GET /api/v1/executions/{id}/status - Progress counters.
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExecutionStatusReport>>, AppError> {
    let timer = RequestTimer::start();
    let report = state.engine.status(id)?;
    Ok(Json(execution_links(timer.success(report), id)))
}

/// POST /api/v1/executions/{id}/cancel - Cancel an active execution.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CancelReport>>, AppError> {
    let timer = RequestTimer::start();
    let report = state.engine.cancel(id)?;
    Ok(Json(
        timer
            .success(report)
            .with_link("self", &format!("/api/v1/executions/{id}")),
    ))
}
