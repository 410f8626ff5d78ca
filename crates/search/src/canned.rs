//! Placeholder engine: assembles an answer from a fixed pool of sentences.
//!
//! Model:
//! - seed = sum of the query's code points
//! - pick 3 distinct sentences from the pool with a seeded RNG
//! - full = picked sentences joined by a space; short = `shorten(full, 280)`

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::engine::{ComputationError, QueryEngine, SearchResult, SHORT_RESULT_WIDTH};
use crate::text::shorten;

const SENTENCES: [&str; 5] = [
    "We collected the latest updates from public sources.",
    "Key facts are cross-checked against multiple outlets.",
    "Analysis relies on open reports and official statements.",
    "Trends may change quickly; monitor for updates.",
    "Review original materials if you need exact quotes.",
];

const PICKS: usize = 3;

/// Queries longer than this (in characters) are refused.
pub const MAX_QUERY_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct CannedSearch;

impl CannedSearch {
    pub fn new() -> Self {
        Self
    }

    fn seed(query: &str) -> u64 {
        query.chars().map(|c| u64::from(u32::from(c))).sum()
    }
}

impl QueryEngine for CannedSearch {
    fn compute(&self, query: &str) -> Result<SearchResult, ComputationError> {
        if query.trim().is_empty() {
            return Err(ComputationError::InvalidQuery("query is empty".to_string()));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(ComputationError::InvalidQuery(format!(
                "query exceeds {MAX_QUERY_CHARS} characters"
            )));
        }

        let mut rng = StdRng::seed_from_u64(Self::seed(query));
        let picked = rand::seq::index::sample(&mut rng, SENTENCES.len(), PICKS);

        let full = picked
            .iter()
            .map(|i| SENTENCES[i])
            .collect::<Vec<_>>()
            .join(" ");
        let short = shorten(&full, SHORT_RESULT_WIDTH, "...");

        Ok(SearchResult { short, full })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn picks_three_distinct_sentences() {
        let result = CannedSearch.compute("hello").unwrap();
        let hits: Vec<_> = SENTENCES.iter().filter(|s| result.full.contains(*s)).collect();
        assert_eq!(hits.len(), PICKS);
    }

    #[test]
    fn rejects_blank_and_oversized_queries() {
        assert!(CannedSearch.compute("   ").is_err());
        let huge = "x".repeat(MAX_QUERY_CHARS + 1);
        assert!(matches!(
            CannedSearch.compute(&huge),
            Err(ComputationError::InvalidQuery(_))
        ));
    }

    proptest! {
        #[test]
        fn same_query_same_answer(query in "[a-zA-Z0-9 ]{1,200}") {
            prop_assume!(!query.trim().is_empty());
            let a = CannedSearch.compute(&query).unwrap();
            let b = CannedSearch.compute(&query).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn short_result_fits_and_derives_from_full(query in "\\PC{1,100}") {
            prop_assume!(!query.trim().is_empty());
            let result = CannedSearch.compute(&query).unwrap();
            prop_assert!(result.short.chars().count() <= SHORT_RESULT_WIDTH);
            prop_assert!(
                result.full.starts_with(&result.short)
                    || (result.short.ends_with("...")
                        && result.full.starts_with(result.short.trim_end_matches("...")))
            );
        }
    }
}
