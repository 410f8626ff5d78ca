use axum::Router;

pub mod system;
pub mod tasks;

/// Router for the versioned task endpoints.
pub fn router() -> Router {
    Router::new().nest("/api/v1/search-tasks", tasks::router())
}
