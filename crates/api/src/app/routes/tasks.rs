use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use scout_core::{PageRequest, TaskId, TaskStatus, DEFAULT_PAGE_SIZE};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_task).get(list_tasks))
        .route("/:id", get(get_task))
        .route("/:id/retry", post(retry_task))
}

pub async fn submit_task(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::SubmitTaskRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => {
            return errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.body_text());
        }
    };

    let task = match services.submit(&body.identity, &body.text).await {
        Ok(t) => t,
        Err(e) => return errors::pipeline_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(dto::SubmittedTask {
            task_id: task.id().to_string(),
            status: task.status(),
            queued_at: task.created_at(),
        }),
    )
        .into_response()
}

pub async fn list_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::ListTasksQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => {
            return errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.body_text());
        }
    };

    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<TaskStatus>() {
            Ok(s) => Some(s),
            Err(e) => return errors::domain_error_to_response(e),
        },
    };

    let page = match PageRequest::new(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    ) {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let listing = match services.list(status, page).await {
        Ok(l) => l,
        Err(e) => return errors::pipeline_error_to_response(e),
    };

    Json(dto::TaskListResponse {
        data: listing.items.iter().map(dto::TaskView::from).collect(),
        meta: page.meta(listing.total),
    })
    .into_response()
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    // An id that cannot name a task is reported the same way as a missing one.
    let Ok(id) = id.parse::<TaskId>() else {
        return errors::not_found();
    };

    match services.get(id).await {
        Ok(Some(task)) => Json(dto::TaskView::from(&task)).into_response(),
        Ok(None) => errors::not_found(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn retry_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(id) = id.parse::<TaskId>() else {
        return errors::not_found();
    };

    let task = match services.retry(id).await {
        Ok(t) => t,
        Err(e) => return errors::pipeline_error_to_response(e),
    };

    (
        StatusCode::ACCEPTED,
        Json(dto::RequeuedTask {
            task_id: task.id().to_string(),
            status: task.status(),
        }),
    )
        .into_response()
}
