//! Boolean queries: lexing, infix to postfix compilation, evaluation over
//! postings and ranking.

use crate::error::{QueryError, Result};
use crate::index::Posting;
use crate::persist::IndexStore;
use crate::tokenizer::tokenize_query_atom;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

lazy_static! {
    static ref LEXEME: Regex = Regex::new(r"\bAND\b|\bNOT\b|\bOR\b|\(|\)|\w+").expect("valid regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryToken {
    Term(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl QueryToken {
    fn precedence(&self) -> Option<u8> {
        match self {
            QueryToken::Not => Some(3),
            QueryToken::And => Some(2),
            QueryToken::Or => Some(1),
            _ => None,
        }
    }

    fn is_right_associative(&self) -> bool {
        matches!(self, QueryToken::Not)
    }
}

impl fmt::Display for QueryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryToken::Term(t) => f.write_str(t),
            QueryToken::And => f.write_str("AND"),
            QueryToken::Or => f.write_str("OR"),
            QueryToken::Not => f.write_str("NOT"),
            QueryToken::Open => f.write_str("("),
            QueryToken::Close => f.write_str(")"),
        }
    }
}

/// Split a raw query into operators, parentheses and normalized terms.
///
/// Operators are recognised only as the exact upper-case keywords. Words that
/// normalize to nothing (stopwords, numbers) are dropped.
pub fn lex(query: &str) -> Vec<QueryToken> {
    LEXEME
        .find_iter(query)
        .filter_map(|m| match m.as_str() {
            "AND" => Some(QueryToken::And),
            "OR" => Some(QueryToken::Or),
            "NOT" => Some(QueryToken::Not),
            "(" => Some(QueryToken::Open),
            ")" => Some(QueryToken::Close),
            word => tokenize_query_atom(word).map(QueryToken::Term),
        })
        .collect()
}

/// Shunting-yard: NOT binds tightest and is right-associative, then AND, then OR.
pub fn to_postfix(tokens: &[QueryToken]) -> std::result::Result<Vec<QueryToken>, QueryError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut operators: Vec<QueryToken> = Vec::new();

    for token in tokens {
        match token {
            QueryToken::Term(_) => output.push(token.clone()),
            QueryToken::Open => operators.push(QueryToken::Open),
            QueryToken::Close => loop {
                match operators.pop() {
                    Some(QueryToken::Open) => break,
                    Some(op) => output.push(op),
                    None => return Err(QueryError::UnbalancedParentheses),
                }
            },
            op => {
                let precedence = op.precedence().unwrap_or(0);
                while let Some(top) = operators.last().and_then(QueryToken::precedence) {
                    let yields = if op.is_right_associative() { precedence < top } else { precedence <= top };
                    if !yields {
                        break;
                    }
                    output.extend(operators.pop());
                }
                operators.push(op.clone());
            }
        }
    }

    while let Some(op) = operators.pop() {
        if op == QueryToken::Open {
            return Err(QueryError::UnbalancedParentheses);
        }
        output.push(op);
    }
    Ok(output)
}

/// What a query is evaluated against.
pub trait PostingSource {
    fn postings(&self, term: &str) -> Result<Vec<Posting>>;
    fn document_paths(&self) -> Result<BTreeSet<String>>;
}

impl PostingSource for IndexStore {
    fn postings(&self, term: &str) -> Result<Vec<Posting>> {
        self.lookup(term)
    }

    fn document_paths(&self) -> Result<BTreeSet<String>> {
        self.all_document_paths()
    }
}

/// Per-document evidence collected while evaluating a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocAggregate {
    pub match_count: u32,
    pub total_tf: u64,
    pub terms: BTreeSet<String>,
    pub pages: BTreeSet<u32>,
}

impl DocAggregate {
    fn absorb(&mut self, other: DocAggregate) {
        self.match_count += other.match_count;
        self.total_tf += other.total_tf;
        self.terms.extend(other.terms);
        self.pages.extend(other.pages);
    }
}

pub type Aggregates = HashMap<String, DocAggregate>;

/// A compiled boolean query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    postfix: Vec<QueryToken>,
}

impl Query {
    pub fn parse(raw: &str) -> std::result::Result<Self, QueryError> {
        Ok(Self { postfix: to_postfix(&lex(raw))? })
    }

    pub fn evaluate<S: PostingSource + ?Sized>(&self, source: &S) -> Result<Aggregates> {
        evaluate(&self.postfix, source)
    }
}

/// Run a postfix query. An empty query matches nothing; a missing operand or
/// leftover operands are reported as [`QueryError`]s.
pub fn evaluate<S: PostingSource + ?Sized>(postfix: &[QueryToken], source: &S) -> Result<Aggregates> {
    let mut stack: Vec<Aggregates> = Vec::new();

    for token in postfix {
        let value = match token {
            QueryToken::Term(term) => leaf(source, term)?,
            QueryToken::Not => {
                let operand = stack.pop().ok_or(QueryError::MissingOperand { operator: "NOT" })?;
                source
                    .document_paths()?
                    .into_iter()
                    .filter(|path| !operand.contains_key(path))
                    .map(|path| (path, DocAggregate::default()))
                    .collect()
            }
            QueryToken::And | QueryToken::Or => {
                let operator = if *token == QueryToken::And { "AND" } else { "OR" };
                let right = stack.pop().ok_or(QueryError::MissingOperand { operator })?;
                let left = stack.pop().ok_or(QueryError::MissingOperand { operator })?;
                if *token == QueryToken::And {
                    intersect(left, right)
                } else {
                    union(left, right)
                }
            }
            QueryToken::Open | QueryToken::Close => return Err(QueryError::UnbalancedParentheses.into()),
        };
        stack.push(value);
    }

    match stack.len() {
        0 => Ok(Aggregates::new()),
        1 => Ok(stack.pop().unwrap_or_default()),
        count => Err(QueryError::DanglingOperands { count }.into()),
    }
}

fn leaf<S: PostingSource + ?Sized>(source: &S, term: &str) -> Result<Aggregates> {
    let mut docs = Aggregates::new();
    for posting in source.postings(term)? {
        let agg = docs.entry(posting.path).or_default();
        agg.match_count += 1;
        agg.total_tf += u64::from(posting.frequency);
        agg.terms.insert(term.to_owned());
        agg.pages.insert(posting.page);
    }
    Ok(docs)
}

fn intersect(mut left: Aggregates, right: Aggregates) -> Aggregates {
    right
        .into_iter()
        .filter_map(|(path, r)| {
            left.remove(&path).map(|mut l| {
                l.absorb(r);
                (path, l)
            })
        })
        .collect()
}

fn union(mut left: Aggregates, right: Aggregates) -> Aggregates {
    for (path, r) in right {
        left.entry(path).or_default().absorb(r);
    }
    left
}

/// One search hit. Field names on the wire follow the search page's contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedResult {
    pub path: String,
    #[serde(rename = "page_numbers")]
    pub pages: Vec<u32>,
    pub match_count: u32,
    pub total_tf: u64,
    #[serde(rename = "match_terms")]
    pub terms: Vec<String>,
    #[serde(rename = "snippet")]
    pub snippets: Vec<String>,
}

/// Order by match count, then total term frequency, both descending; equal
/// keys fall back to path order.
pub fn rank(aggregates: Aggregates) -> Vec<RankedResult> {
    let mut results: Vec<RankedResult> = aggregates
        .into_iter()
        .map(|(path, agg)| RankedResult {
            path,
            pages: agg.pages.into_iter().collect(),
            match_count: agg.match_count,
            total_tf: agg.total_tf,
            terms: agg.terms.into_iter().collect(),
            snippets: Vec::new(),
        })
        .collect();
    results.sort_by(|a, b| {
        b.match_count
            .cmp(&a.match_count)
            .then(b.total_tf.cmp(&a.total_tf))
            .then_with(|| a.path.cmp(&b.path))
    });
    results
}

/// Join bare words with `AND` so every word must match. Explicit operators
/// and parentheses are respected.
pub fn expand_all_terms(query: &str) -> String {
    let words: Vec<&str> = query.split_whitespace().collect();
    let mut out: Vec<&str> = Vec::with_capacity(words.len() * 2);
    for (i, word) in words.iter().enumerate() {
        out.push(word);
        if let Some(next) = words.get(i + 1) {
            let left_open = matches!(*word, "AND" | "OR" | "NOT") || word.ends_with('(');
            let right_binary = matches!(*next, "AND" | "OR") || next.starts_with(')');
            if !left_open && !right_binary {
                out.push("AND");
            }
        }
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postfix_of(raw: &str) -> String {
        let tokens = to_postfix(&lex(raw)).unwrap();
        tokens.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn lexes_operators_case_sensitively() {
        let tokens = lex("Apple and Pear OR (plum)");
        assert_eq!(
            tokens,
            vec![
                QueryToken::Term("apple".into()),
                QueryToken::Term("pear".into()),
                QueryToken::Or,
                QueryToken::Open,
                QueryToken::Term("plum".into()),
                QueryToken::Close,
            ]
        );
    }

    #[test]
    fn keyword_prefix_is_a_word() {
        assert_eq!(lex("ANDROID"), vec![QueryToken::Term("android".into())]);
    }

    #[test]
    fn nested_not_compiles_to_postfix() {
        assert_eq!(postfix_of("apple AND ( banana OR NOT cherry )"), "apple banana cherry NOT OR AND");
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(postfix_of("apple OR banana AND cherry"), "apple banana cherry AND OR");
        assert_eq!(postfix_of("apple AND banana OR cherry"), "apple banana AND cherry OR");
    }

    #[test]
    fn binary_operators_are_left_associative() {
        assert_eq!(postfix_of("apple OR banana OR cherry"), "apple banana OR cherry OR");
    }

    #[test]
    fn not_is_right_associative() {
        assert_eq!(postfix_of("NOT NOT apple"), "apple NOT NOT");
    }

    #[test]
    fn unbalanced_parentheses_fail() {
        assert_eq!(to_postfix(&lex("apple )")), Err(QueryError::UnbalancedParentheses));
        assert_eq!(to_postfix(&lex("( apple")), Err(QueryError::UnbalancedParentheses));
    }

    #[test]
    fn expansion_joins_bare_words() {
        assert_eq!(expand_all_terms("apple banana"), "apple AND banana");
        assert_eq!(expand_all_terms("apple OR banana"), "apple OR banana");
        assert_eq!(expand_all_terms("apple NOT banana"), "apple AND NOT banana");
        assert_eq!(expand_all_terms("(apple banana) cherry"), "(apple AND banana) AND cherry");
        assert_eq!(expand_all_terms("single"), "single");
    }
}
