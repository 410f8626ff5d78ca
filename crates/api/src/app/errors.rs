use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use scout_core::DomainError;
use scout_infra::{pipeline::PipelineError, store::StoreError};

const TASK_NOT_FOUND: &str = "Task not found";
const TASK_IN_PROGRESS: &str = "Task is still in progress";

pub fn pipeline_error_to_response(err: PipelineError) -> axum::response::Response {
    match err {
        PipelineError::Domain(e) => domain_error_to_response(e),
        PipelineError::Store(StoreError::NotFound(_)) => not_found(),
        PipelineError::Store(StoreError::Conflict(_)) => {
            json_error(StatusCode::CONFLICT, "conflict", TASK_IN_PROGRESS)
        }
        PipelineError::Store(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        PipelineError::Transport(e) => {
            json_error(StatusCode::BAD_GATEWAY, "transport_error", e.to_string())
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
        DomainError::NotFound => not_found(),
        DomainError::Conflict(_) | DomainError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "conflict", TASK_IN_PROGRESS)
        }
    }
}

pub fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", TASK_NOT_FOUND)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
