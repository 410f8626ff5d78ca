use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length (in characters) of a short result.
pub const SHORT_RESULT_WIDTH: usize = 280;

/// Output of a query computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// At most [`SHORT_RESULT_WIDTH`] characters.
    pub short: String,
    pub full: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("search failed: {0}")]
    Failed(String),
}

/// Something that can answer a query.
///
/// Implementations must be deterministic: redelivered work recomputes the
/// result, and both runs must agree.
pub trait QueryEngine: Send + Sync {
    fn compute(&self, query: &str) -> Result<SearchResult, ComputationError>;
}

impl<T> QueryEngine for std::sync::Arc<T>
where
    T: QueryEngine + ?Sized,
{
    fn compute(&self, query: &str) -> Result<SearchResult, ComputationError> {
        (**self).compute(query)
    }
}
