//! `scout-search`
//!
//! **Responsibility:** turn a query into a short and a full result.
//!
//! This crate is pure: no IO, no clock, no task state. The worker stage calls
//! it and records whatever comes back.

pub mod canned;
pub mod engine;
pub mod text;

pub use canned::CannedSearch;
pub use engine::{ComputationError, QueryEngine, SearchResult, SHORT_RESULT_WIDTH};
pub use text::shorten;
