use crate::error::{Error, SearchError};
use crate::extract::ExtractorRegistry;
use crate::query::{expand_all_terms, rank, PostingSource, Query, RankedResult};
use crate::snippet::extract_snippets;
use crate::spellcheck::SpellChecker;
use serde::Serialize;

/// Results that get snippets; the rest carry an empty list.
pub const SNIPPET_RESULTS: usize = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    /// "Did you mean" text. Informational only; it is never what gets searched.
    pub suggestion: String,
}

pub struct SearchEngine<'a, S> {
    source: &'a S,
    extractors: &'a ExtractorRegistry,
    speller: &'a SpellChecker,
}

impl<'a, S: PostingSource> SearchEngine<'a, S> {
    pub fn new(source: &'a S, extractors: &'a ExtractorRegistry, speller: &'a SpellChecker) -> Self {
        Self { source, extractors, speller }
    }

    /// Evaluate `raw` and rank the hits. With `all_terms`, bare words are
    /// joined with `AND` before compiling.
    pub fn search(&self, raw: &str, all_terms: bool) -> Result<SearchResponse, SearchError> {
        let suggestion = self.speller.lookup_compound(raw);
        let text = if all_terms { expand_all_terms(raw) } else { raw.to_owned() };

        let query = Query::parse(&text).map_err(|err| {
            tracing::info!(query = %text, error = %err, "rejecting query");
            SearchError::InvalidQuery
        })?;
        let aggregates = query.evaluate(self.source).map_err(|err| match err {
            Error::Query(err) => {
                tracing::info!(query = %text, error = %err, "rejecting query");
                SearchError::InvalidQuery
            }
            other => SearchError::Store(other),
        })?;

        let mut results = rank(aggregates);
        for result in results.iter_mut().take(SNIPPET_RESULTS) {
            result.snippets = extract_snippets(self.extractors, result);
        }
        tracing::debug!(query = %text, hits = results.len(), "search complete");
        Ok(SearchResponse { results, suggestion })
    }
}
