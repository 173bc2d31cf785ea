use crate::error::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

lazy_static! {
    static ref PIECES: Regex = Regex::new(r"[\w'’-]+|[()]").expect("valid regex");
}

pub const MAX_EDIT_DISTANCE: usize = 2;

const OPERATORS: &[&str] = &["AND", "OR", "NOT", "(", ")"];

/// Frequency-dictionary spelling correction for whole query strings.
#[derive(Debug, Clone)]
pub struct SpellChecker {
    frequencies: HashMap<String, u64>,
    max_distance: usize,
    protect_operators: bool,
}

impl Default for SpellChecker {
    fn default() -> Self {
        Self { frequencies: HashMap::new(), max_distance: MAX_EDIT_DISTANCE, protect_operators: true }
    }
}

impl SpellChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, `AND`/`OR`/`NOT` and parentheses pass through untouched.
    /// Otherwise they are corrected like any other word.
    pub fn protect_operators(mut self, protect: bool) -> Self {
        self.protect_operators = protect;
        self
    }

    pub fn add_word(&mut self, term: &str, count: u64) {
        *self.frequencies.entry(term.to_lowercase()).or_insert(0) += count;
    }

    pub fn extend<I: IntoIterator<Item = (String, u64)>>(&mut self, words: I) {
        for (term, count) in words {
            self.add_word(&term, count);
        }
    }

    /// Load a `term count` per line dictionary. Malformed lines are skipped.
    /// Returns the number of entries read.
    pub fn load_dictionary(&mut self, path: &Path) -> Result<usize> {
        let raw = fs::read_to_string(path)?;
        let mut loaded = 0;
        for line in raw.lines() {
            let mut fields = line.split_whitespace();
            let (Some(term), Some(count)) = (fields.next(), fields.next()) else {
                continue;
            };
            if let Ok(count) = count.parse::<u64>() {
                self.add_word(term, count);
                loaded += 1;
            }
        }
        tracing::info!(path = %path.display(), loaded, "loaded spelling dictionary");
        Ok(loaded)
    }

    /// Number of distinct dictionary words.
    pub fn word_count(&self) -> usize {
        self.frequencies.len()
    }

    /// Closest dictionary word within the edit distance bound, preferring the
    /// smaller distance, then the more frequent word.
    pub fn correct_word(&self, word: &str) -> Option<(String, usize)> {
        let word = word.to_lowercase();
        if self.frequencies.contains_key(&word) {
            return Some((word, 0));
        }
        let len = word.chars().count();
        self.frequencies
            .iter()
            .filter(|(term, _)| term.chars().count().abs_diff(len) <= self.max_distance)
            .filter_map(|(term, &freq)| {
                let distance = strsim::osa_distance(&word, term);
                (distance <= self.max_distance).then_some((distance, Reverse(freq), term))
            })
            .min()
            .map(|(distance, _, term)| (term.clone(), distance))
    }

    /// Correct a whole query string word by word. Unknown words may also be
    /// merged with their neighbour or split in two when that yields known
    /// words. The result is lower-cased; punctuation is dropped.
    pub fn lookup_compound(&self, text: &str) -> String {
        let pieces: Vec<&str> = PIECES.find_iter(text).map(|m| m.as_str()).collect();
        let mut out: Vec<String> = Vec::with_capacity(pieces.len());
        let mut i = 0;
        while i < pieces.len() {
            let piece = pieces[i];
            i += 1;
            if self.protect_operators && OPERATORS.contains(&piece) {
                out.push(piece.to_owned());
                continue;
            }
            if piece == "(" || piece == ")" {
                continue;
            }

            let word = piece.to_lowercase();
            if self.frequencies.contains_key(&word) {
                out.push(word);
                continue;
            }
            if let Some(next) = pieces.get(i).filter(|n| self.is_plain_word(n)) {
                let joined = format!("{word}{}", next.to_lowercase());
                if self.frequencies.contains_key(&joined) {
                    out.push(joined);
                    i += 1;
                    continue;
                }
            }
            if let Some((corrected, _)) = self.correct_word(&word) {
                out.push(corrected);
            } else if let Some((head, tail)) = self.split_word(&word) {
                out.push(head);
                out.push(tail);
            } else {
                out.push(word);
            }
        }
        out.join(" ")
    }

    fn is_plain_word(&self, piece: &str) -> bool {
        piece != "(" && piece != ")" && !(self.protect_operators && OPERATORS.contains(&piece))
    }

    fn split_word(&self, word: &str) -> Option<(String, String)> {
        word.char_indices()
            .skip(1)
            .filter_map(|(at, _)| {
                let (head, tail) = word.split_at(at);
                let a = self.frequencies.get(head)?;
                let b = self.frequencies.get(tail)?;
                Some((*a.min(b), head, tail))
            })
            .max_by_key(|(score, _, _)| *score)
            .map(|(_, head, tail)| (head.to_owned(), tail.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> SpellChecker {
        let mut s = SpellChecker::new();
        s.extend(
            [
                ("banana", 500),
                ("apple", 800),
                ("spelling", 300),
                ("quickly", 200),
                ("my", 9000),
                ("name", 4000),
                ("is", 9500),
                ("here", 5000),
                ("and", 9900),
                ("not", 9000),
                ("or", 8000),
                ("note", 1000),
                ("sun", 300),
                ("flower", 300),
                ("sunflower", 50),
                ("ice", 300),
                ("cream", 300),
            ]
            .into_iter()
            .map(|(w, c)| (w.to_string(), c)),
        );
        s
    }

    #[test]
    fn corrects_single_words() {
        let s = checker();
        assert_eq!(s.lookup_compound("bananna"), "banana");
        assert_eq!(s.lookup_compound("APPLE"), "apple");
        assert_eq!(s.lookup_compound("speling"), "spelling");
        assert_eq!(s.lookup_compound("quikly"), "quickly");
    }

    #[test]
    fn corrects_sentences_and_drops_punctuation() {
        assert_eq!(checker().lookup_compound("Mi namme is herre."), "my name is here");
    }

    #[test]
    fn words_beyond_the_bound_are_kept() {
        assert_eq!(checker().lookup_compound("xylophone"), "xylophone");
    }

    #[test]
    fn merges_and_splits() {
        let s = checker();
        assert_eq!(s.lookup_compound("sunf lower"), "sunflower");
        assert_eq!(s.lookup_compound("icecream"), "ice cream");
    }

    #[test]
    fn operators_protected_by_default() {
        assert_eq!(checker().lookup_compound("bananna AND ( apple OR NOT aple )"), "banana AND ( apple OR NOT apple )");
    }

    #[test]
    fn operators_corrected_when_unprotected() {
        let s = checker().protect_operators(false);
        assert_eq!(s.lookup_compound("bananna AND (apple)"), "banana and apple");
    }

    #[test]
    fn dictionary_file_is_term_count_pairs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dict.txt");
        fs::write(&path, "hello 10\nbroken\nworld 5\nbad x\n").unwrap();
        let mut s = SpellChecker::new();
        assert_eq!(s.load_dictionary(&path).unwrap(), 2);
        assert_eq!(s.correct_word("wrld"), Some(("world".to_string(), 1)));
    }
}
