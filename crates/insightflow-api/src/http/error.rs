//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use insightflow_core::workflow::EngineError;
use insightflow_types::error::WorkflowError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    Validation(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Engine(EngineError::UnknownTemplate(_))
            | AppError::Engine(EngineError::Workflow(WorkflowError::UnknownTemplate(_))) => {
                (StatusCode::NOT_FOUND, "TEMPLATE_NOT_FOUND", None)
            }
            AppError::Engine(EngineError::UnknownExecution(_)) => {
                (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", None)
            }
            AppError::Engine(EngineError::AlreadyRunning(_)) => {
                (StatusCode::CONFLICT, "ALREADY_RUNNING", None)
            }
            AppError::Engine(EngineError::Cancelled(_)) => {
                (StatusCode::CONFLICT, "EXECUTION_CANCELLED", None)
            }
            AppError::Engine(EngineError::CircularDependency { steps })
            | AppError::Engine(EngineError::Workflow(WorkflowError::CircularDependency { steps })) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CIRCULAR_DEPENDENCY",
                Some(json!({ "steps": steps })),
            ),
            AppError::Engine(EngineError::Workflow(WorkflowError::UnknownDependency {
                step,
                dependency,
            })) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNKNOWN_DEPENDENCY",
                Some(json!({ "step": step, "dependency": dependency })),
            ),
            AppError::Engine(EngineError::Workflow(WorkflowError::UnknownStep { step, .. })) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNKNOWN_STEP",
                Some(json!({ "step": step })),
            ),
            AppError::Engine(EngineError::Workflow(WorkflowError::ValidationError(_)))
            | AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Engine(e) => write!(f, "{e}"),
            AppError::Validation(msg) | AppError::Internal(msg) => f.write_str(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        tracing::debug!(code, error = %self, "request rejected");
        let body = ApiResponse::error(code, &self.to_string(), details);
        (status, Json(body)).into_response()
    }
}
