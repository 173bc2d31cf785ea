use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref SYMBOLS: Regex = Regex::new(r"[%^&*~\[\]]").expect("valid regex");
    static ref URL: Regex =
        Regex::new(r"\b(?:https?://)?(?:www\.)?[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}(?:/[^\s]*)?").expect("valid regex");
    static ref URL_SUFFIX: Regex = Regex::new(r"\.\w{2,5}(/|$)").expect("valid regex");
    static ref SEPARATORS: Regex = Regex::new(r"[()/:]").expect("valid regex");
    static ref DATE: Regex =
        Regex::new(r"\b(0?[1-9]|[12][0-9]|3[01])\.(0?[1-9]|1[0-2])\.(\d{4})\b").expect("valid regex");
    static ref NOISE: Regex = Regex::new(r"[“\-_.,0-9]{2,}").expect("valid regex");
    static ref APOSTROPHES: Regex = Regex::new(r"[’']+").expect("valid regex");
    static ref STOPWORDS: HashSet<String> = include_str!("stoplist.txt")
        .lines()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
}

/// Characters trimmed from both ends of every word.
const WORD_TRIM: &[char] = &['"', ',', '.', '“', '”', '>', '`', '!', '?', ';', '='];

/// A word consisting of exactly one of these carries no meaning.
fn is_filler(c: char) -> bool {
    matches!(c, '“' | '-' | '.' | ' ' | '_' | ',') || c.is_ascii_digit()
}

pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(term)
}

/// Tokenize text into normalized terms.
///
/// Words come first (in reading order, stopwords removed), then any
/// `day.month.year` dates, then the URLs found in the text. URLs are
/// deduplicated keeping the first occurrence.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>();
    let body = SYMBOLS.replace_all(&normalized, "");

    let urls = extract_urls(&body);
    let body = URL.replace_all(&body, "");
    let body = SEPARATORS.replace_all(&body, "");

    let dates: Vec<String> = DATE
        .captures_iter(&body)
        .map(|c| format!("{}.{}.{}", &c[1], &c[2], &c[3]))
        .collect();
    let body = DATE.replace_all(&body, "");

    let mut terms = Vec::new();
    for line in body.lines() {
        let line = line.trim_start_matches('#').trim();
        if line.is_empty() {
            continue;
        }
        for word in line.split_whitespace() {
            push_word_terms(word, &mut terms);
        }
    }
    terms.retain(|t| !is_stopword(t));

    terms.extend(dates);
    terms.extend(urls);
    terms
}

/// Normalize a single query word. Only the first derived term survives, so a
/// query operand is always exactly one index term (or nothing).
pub fn tokenize_query_atom(word: &str) -> Option<String> {
    tokenize(&word.to_lowercase()).into_iter().next()
}

fn push_word_terms(word: &str, out: &mut Vec<String>) {
    let word = word.trim_matches(WORD_TRIM);
    let mut chars = word.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if is_filler(c) {
            return;
        }
    }
    let word = NOISE.replace_all(word, "");
    if word.is_empty() {
        return;
    }
    let lowered = word.to_lowercase();
    out.extend(
        APOSTROPHES
            .split(&lowered)
            .filter(|part| !part.is_empty())
            .map(str::to_owned),
    );
}

fn extract_urls(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for m in URL.find_iter(body) {
        let mut url = m.as_str();
        // "https://a.com/(https://b.com)" style captures keep only the first link
        if url.contains('(') && url.matches("http").count() > 1 {
            url = url.split_once('(').map_or(url, |(head, _)| head);
        }
        let url = url.trim_end_matches(&[')', '.', ',', ';'][..]);
        if URL_SUFFIX.is_match(url) && seen.insert(url) {
            urls.push(url.to_owned());
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Running, runner's run!");
        assert_eq!(t, vec!["running", "runner", "s", "run"]);
    }

    #[test]
    fn strips_heading_markers_and_blank_lines() {
        let t = tokenize("## Release notes\n\n   \n# Summary");
        assert_eq!(t, vec!["release", "notes", "summary"]);
    }

    #[test]
    fn drops_numeric_noise() {
        let t = tokenize("version 1.2.3 -- 42 7");
        assert_eq!(t, vec!["version"]);
    }

    #[test]
    fn strips_symbols_without_splitting() {
        let t = tokenize("50% [draft] mark~up");
        assert_eq!(t, vec!["draft", "markup"]);
    }

    #[test]
    fn urls_are_deduplicated_in_first_seen_order() {
        let t = tokenize("see docs.rs/regex and example.org then docs.rs/regex again");
        let urls: Vec<&String> = t.iter().filter(|w| w.contains('.')).collect();
        assert_eq!(urls, vec!["docs.rs/regex", "example.org"]);
    }

    #[test]
    fn url_trailing_punctuation_is_trimmed() {
        let t = tokenize("Source: (https://example.com/a).");
        assert!(t.contains(&"https://example.com/a".to_string()));
    }

    #[test]
    fn query_atom_keeps_first_term() {
        assert_eq!(tokenize_query_atom("Bananas"), Some("bananas".to_string()));
        assert_eq!(tokenize_query_atom("rock'n"), Some("rock".to_string()));
        assert_eq!(tokenize_query_atom("the"), None);
    }
}
