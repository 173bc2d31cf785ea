use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("id ledger error: {0}")]
    Ledger(#[from] csv::Error),

    #[error("corrupt index entry in {tree}: {reason}")]
    CorruptEntry { tree: &'static str, reason: String },

    #[error("malformed query: {0}")]
    Query(#[from] QueryError),
}

/// Why a document's text could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no extractor registered for extension {extension:?}")]
    Unsupported { extension: String },

    #[error("could not read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// Structural problems found while compiling or evaluating a boolean query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("operator {operator} is missing an operand")]
    MissingOperand { operator: &'static str },

    #[error("{count} operands left without an operator")]
    DanglingOperands { count: usize },
}

/// Failure reported at the search boundary. The specific [`QueryError`] is
/// logged but not carried across.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid query")]
    InvalidQuery,

    #[error(transparent)]
    Store(#[from] Error),
}
