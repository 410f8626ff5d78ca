//! HTTP API: task submission, inspection and retry.

pub mod app;
pub mod middleware;
