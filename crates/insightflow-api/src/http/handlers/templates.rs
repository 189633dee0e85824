//! Template catalog handlers.

use axum::Json;
use axum::extract::{Path, State};

use insightflow_core::workflow::EngineError;
use insightflow_types::workflow::{TemplateSummary, WorkflowTemplate};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// GET /api/v1/templates - List catalog templates.
pub async fn list_templates(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<TemplateSummary>>> {
    let timer = RequestTimer::start();
    let templates = state.engine.list_templates();
    Json(timer.success(templates).with_link("self", "/api/v1/templates"))
}

/// GET /api/v1/templates/{id} - Full template definition.
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowTemplate>>, AppError> {
    let timer = RequestTimer::start();
    let template = state
        .engine
        .catalog()
        .get(&id)
        .cloned()
        .ok_or(EngineError::UnknownTemplate(id.clone()))?;

    Ok(Json(
        timer
            .success(template)
            .with_link("self", &format!("/api/v1/templates/{id}"))
            .with_link("executions", "/api/v1/executions"),
    ))
}
