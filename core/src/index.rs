use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub type TokenId = u64;
pub type DocId = u64;

/// Free-form per-document metadata. Only [`LAST_INDEXED`] and [`TAGS`] have
/// meaning to the engine; every other key is carried untouched.
pub type Metadata = serde_json::Map<String, Value>;

pub const LAST_INDEXED: &str = "last_indexed";
pub const TAGS: &str = "tags";
pub const IDENTITY: &str = "identity";
pub const ORIGINAL_NAME: &str = "original_name";
pub const LAST_ERROR: &str = "last_error";

/// One inverted-index entry as returned by a term lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub path: String,
    pub page: u32,
    pub frequency: u32,
}

/// The row stored per document. `metadata` is kept as JSON text so arbitrary
/// values survive the binary encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DocumentRecord {
    pub id: DocId,
    pub metadata: String,
}

pub fn last_indexed(metadata: &Metadata) -> Option<OffsetDateTime> {
    metadata
        .get(LAST_INDEXED)
        .and_then(Value::as_str)
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

pub fn stamp(at: OffsetDateTime) -> Value {
    Value::String(at.format(&Rfc3339).unwrap_or_default())
}

pub fn tags(metadata: &Metadata) -> BTreeSet<String> {
    match metadata.get(TAGS) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
        Some(Value::String(single)) => std::iter::once(single.clone()).collect(),
        _ => BTreeSet::new(),
    }
}

pub fn tags_value<I, S>(tags: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let set: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
    Value::Array(set.into_iter().map(Value::String).collect())
}
