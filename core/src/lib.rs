//! Local document indexing and boolean full-text retrieval.

pub mod discovery;
pub mod error;
pub mod extract;
pub mod identity;
pub mod index;
pub mod persist;
pub mod pipeline;
pub mod query;
pub mod refresh;
pub mod search;
pub mod settings;
pub mod snippet;
pub mod spellcheck;
pub mod tokenizer;

pub use error::{Error, ExtractError, QueryError, Result, SearchError};
pub use extract::{Extractor, ExtractorRegistry, Format};
pub use index::{DocId, Metadata, Posting, TokenId};
pub use persist::{DataPaths, IndexStore};
pub use pipeline::{IndexReport, Indexer};
pub use query::RankedResult;
pub use refresh::{RefreshOptions, RefreshReport};
pub use search::{SearchEngine, SearchResponse};
pub use settings::Settings;
pub use spellcheck::SpellChecker;
