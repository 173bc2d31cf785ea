//! In-context snippets for the top of a result list.

use crate::extract::ExtractorRegistry;
use crate::query::RankedResult;
use regex::RegexBuilder;
use std::path::Path;

/// Words kept on each side of a match.
pub const CONTEXT_WORDS: usize = 5;
/// Snippets shared between the matched terms of one result.
pub const SNIPPET_BUDGET: usize = 5;
pub const FILE_NOT_FOUND: &str = "File Not Found";

/// Every case-insensitive occurrence of `term` in `text`, with up to `n`
/// words (trailing punctuation attached) before and after it.
pub fn context_windows(text: &str, term: &str, n: usize) -> Vec<String> {
    let pattern = format!(
        r"(?:\b\w+[^\s\w]*\s+){{0,{n}}}\b{term}[^\s\w]*(?:\s+\w+[^\s\w]*){{0,{n}}}",
        term = regex::escape(term)
    );
    let re = match RegexBuilder::new(&pattern).case_insensitive(true).size_limit(1 << 24).build() {
        Ok(re) => re,
        Err(err) => {
            tracing::warn!(term, error = %err, "could not build snippet pattern");
            return Vec::new();
        }
    };
    re.find_iter(text).map(|m| m.as_str().to_owned()).collect()
}

/// Re-extract the matching pages of `result` and cut snippets around its
/// matched terms. A document that can no longer be read yields a single
/// [`FILE_NOT_FOUND`] snippet.
pub fn extract_snippets(extractors: &ExtractorRegistry, result: &RankedResult) -> Vec<String> {
    if result.terms.is_empty() {
        return Vec::new();
    }
    let pages = match extractors.extract(Path::new(&result.path)) {
        Ok(pages) if !pages.is_empty() => pages,
        Ok(_) => return vec![FILE_NOT_FOUND.to_owned()],
        Err(err) => {
            tracing::debug!(path = %result.path, error = %err, "snippet source unavailable");
            return vec![FILE_NOT_FOUND.to_owned()];
        }
    };

    let term_count = result.terms.len();
    let mut snippets = Vec::new();
    for &page in &result.pages {
        let Some(text) = (page as usize).checked_sub(1).and_then(|i| pages.get(i)) else {
            continue;
        };
        for term in &result.terms {
            let matches = context_windows(text, term, CONTEXT_WORDS);
            if term_count <= SNIPPET_BUDGET {
                snippets.extend(matches.into_iter().take(SNIPPET_BUDGET / term_count));
            } else {
                snippets.extend(matches.into_iter().next());
            }
        }
    }
    snippets
}
