use crate::error::{Error, Result};
use crate::index::{DocId, DocumentRecord, Metadata, Posting, TokenId};
use sled::{Batch, Db, IVec, Tree};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Locations of everything the application keeps on disk.
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join("index") }
    pub fn settings(&self) -> PathBuf { self.root.join("config.json") }
    pub fn worklist(&self) -> PathBuf { self.root.join("watchdog.txt") }
}

const DOCUMENTS: &str = "documents";
const DOCUMENT_PATHS: &str = "document_paths";
const TOKENS: &str = "tokens";
const POSTINGS: &str = "postings";
const DOCUMENT_POSTINGS: &str = "document_postings";

/// Persistent inverted index.
///
/// Trees:
/// - `documents`: path -> bincode [`DocumentRecord`]
/// - `document_paths`: doc id -> path
/// - `tokens`: term -> token id
/// - `postings`: token id | doc id | page -> term frequency (additive merge)
/// - `document_postings`: doc id | token id | page -> () for cascading deletes
///
/// Outside a [`BulkLoad`] every write operation is flushed to disk before it
/// returns.
#[derive(Clone)]
pub struct IndexStore {
    db: Db,
    documents: Tree,
    document_paths: Tree,
    tokens: Tree,
    postings: Tree,
    document_postings: Tree,
    bulk_depth: Arc<AtomicUsize>,
}

impl IndexStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let postings = db.open_tree(POSTINGS)?;
        postings.set_merge_operator(add_frequency);
        Ok(Self {
            documents: db.open_tree(DOCUMENTS)?,
            document_paths: db.open_tree(DOCUMENT_PATHS)?,
            tokens: db.open_tree(TOKENS)?,
            postings,
            document_postings: db.open_tree(DOCUMENT_POSTINGS)?,
            db,
            bulk_depth: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Relax durability until the returned guard is dropped. Writes made in
    /// the meantime are only guaranteed on disk once the guard goes away.
    pub fn bulk_load(&self) -> BulkLoad<'_> {
        if self.bulk_depth.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::debug!("bulk load mode enabled");
        }
        BulkLoad { store: self }
    }

    pub fn is_bulk_loading(&self) -> bool {
        self.bulk_depth.load(Ordering::SeqCst) > 0
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if !self.is_bulk_loading() {
            self.flush()?;
        }
        Ok(())
    }

    /// Add `frequencies` to the postings of `path` on `page`, creating the
    /// document and any unseen tokens. Frequencies accumulate with whatever
    /// is already stored; call [`IndexStore::clear_postings`] first to replace.
    pub fn upsert_postings(&self, path: &str, page: u32, frequencies: &HashMap<String, u32>) -> Result<DocId> {
        let doc = self.ensure_document(path)?;
        for (term, &tf) in frequencies {
            let token = self.ensure_token(term)?;
            self.postings.merge(posting_key(token, doc, page), &tf.to_be_bytes()[..])?;
            self.document_postings.insert(posting_key(doc, token, page), Vec::<u8>::new())?;
        }
        tracing::debug!(path, page, terms = frequencies.len(), "upserted postings");
        self.commit()?;
        Ok(doc)
    }

    pub fn lookup(&self, term: &str) -> Result<Vec<Posting>> {
        let Some(token) = self.tokens.get(term)? else {
            return Ok(Vec::new());
        };
        let mut paths: HashMap<DocId, Option<String>> = HashMap::new();
        let mut out = Vec::new();
        for entry in self.postings.scan_prefix(&token) {
            let (key, value) = entry?;
            let (_, doc, page) = split_key(&key, POSTINGS)?;
            let path = match paths.get(&doc) {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = self.path_of(doc)?;
                    paths.insert(doc, resolved.clone());
                    resolved
                }
            };
            // postings of a document removed mid-scan are skipped
            if let Some(path) = path {
                out.push(Posting { path, page, frequency: decode_frequency(&value, POSTINGS)? });
            }
        }
        Ok(out)
    }

    pub fn all_document_paths(&self) -> Result<BTreeSet<String>> {
        self.documents
            .iter()
            .keys()
            .map(|key| decode_path(&key?))
            .collect()
    }

    /// Every document with its metadata, in path order.
    pub fn documents(&self) -> Result<Vec<(String, Metadata)>> {
        let mut out = Vec::new();
        for entry in self.documents.iter() {
            let (key, value) = entry?;
            let record: DocumentRecord = bincode::deserialize(&value)?;
            out.push((decode_path(&key)?, parse_metadata(&record.metadata)?));
        }
        Ok(out)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn get_metadata(&self, path: &str) -> Result<Option<Metadata>> {
        match self.record(path)? {
            Some(record) => Ok(Some(parse_metadata(&record.metadata)?)),
            None => Ok(None),
        }
    }

    /// Merge `partial` into the stored metadata of `path`; keys not named in
    /// `partial` are kept. Returns `false` if the document is unknown.
    pub fn update_metadata(&self, path: &str, partial: &Metadata) -> Result<bool> {
        loop {
            let Some(current) = self.documents.get(path)? else {
                return Ok(false);
            };
            let mut record: DocumentRecord = bincode::deserialize(&current)?;
            let mut metadata = parse_metadata(&record.metadata)?;
            for (key, value) in partial {
                metadata.insert(key.clone(), value.clone());
            }
            record.metadata = serde_json::to_string(&metadata)?;
            let updated = bincode::serialize(&record)?;
            if self.documents.compare_and_swap(path, Some(&current), Some(updated))?.is_ok() {
                self.commit()?;
                return Ok(true);
            }
        }
    }

    /// Drop every posting of `path` but keep the document and its metadata.
    pub fn clear_postings(&self, path: &str) -> Result<usize> {
        let Some(record) = self.record(path)? else {
            return Ok(0);
        };
        let removed = self.delete_postings(record.id)?;
        self.commit()?;
        Ok(removed)
    }

    /// Remove `path` and all of its postings. Returns `false` if unknown.
    pub fn remove_document(&self, path: &str) -> Result<bool> {
        let Some(record) = self.record(path)? else {
            return Ok(false);
        };
        let postings = self.delete_postings(record.id)?;
        self.documents.remove(path)?;
        self.document_paths.remove(record.id.to_be_bytes())?;
        self.commit()?;
        tracing::info!(path, postings, "removed document");
        Ok(true)
    }

    /// Drop every document, token and posting.
    pub fn clear(&self) -> Result<()> {
        let documents = self.documents.len();
        for tree in [&self.documents, &self.document_paths, &self.tokens, &self.postings, &self.document_postings] {
            tree.clear()?;
        }
        self.flush()?;
        tracing::info!(documents, "cleared index");
        Ok(())
    }

    /// Total term frequency of every token across the whole index.
    pub fn term_frequencies(&self) -> Result<HashMap<String, u64>> {
        let mut by_token: HashMap<TokenId, u64> = HashMap::new();
        for entry in self.postings.iter() {
            let (key, value) = entry?;
            let (token, _, _) = split_key(&key, POSTINGS)?;
            *by_token.entry(token).or_insert(0) += u64::from(decode_frequency(&value, POSTINGS)?);
        }
        let mut out = HashMap::with_capacity(by_token.len());
        for entry in self.tokens.iter() {
            let (term, id) = entry?;
            if let Some(&count) = by_token.get(&decode_id(&id, TOKENS)?) {
                out.insert(decode_path(&term)?, count);
            }
        }
        Ok(out)
    }

    fn record(&self, path: &str) -> Result<Option<DocumentRecord>> {
        match self.documents.get(path)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn path_of(&self, doc: DocId) -> Result<Option<String>> {
        match self.document_paths.get(doc.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_path(&bytes)?)),
            None => Ok(None),
        }
    }

    fn ensure_document(&self, path: &str) -> Result<DocId> {
        loop {
            if let Some(record) = self.record(path)? {
                return Ok(record.id);
            }
            let id = self.db.generate_id()?;
            let record = bincode::serialize(&DocumentRecord { id, metadata: "{}".to_string() })?;
            if self.documents.compare_and_swap(path, None as Option<&[u8]>, Some(record))?.is_ok() {
                self.document_paths.insert(id.to_be_bytes(), path.as_bytes())?;
                return Ok(id);
            }
        }
    }

    fn ensure_token(&self, term: &str) -> Result<TokenId> {
        loop {
            if let Some(id) = self.tokens.get(term)? {
                return decode_id(&id, TOKENS);
            }
            let id = self.db.generate_id()?;
            if self.tokens.compare_and_swap(term, None as Option<&[u8]>, Some(&id.to_be_bytes()[..]))?.is_ok() {
                return Ok(id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_token(&self, term: &str) -> Result<()> {
        self.tokens.insert(term, &[0xff][..])?;
        Ok(())
    }

    fn delete_postings(&self, doc: DocId) -> Result<usize> {
        let mut postings = Batch::default();
        let mut reverse = Batch::default();
        let mut count = 0;
        for key in self.document_postings.scan_prefix(doc.to_be_bytes()).keys() {
            let key = key?;
            let (doc, token, page) = split_key(&key, DOCUMENT_POSTINGS)?;
            postings.remove(&posting_key(token, doc, page)[..]);
            reverse.remove(key);
            count += 1;
        }
        self.postings.apply_batch(postings)?;
        self.document_postings.apply_batch(reverse)?;
        Ok(count)
    }
}

/// Scoped bulk-load mode; see [`IndexStore::bulk_load`].
pub struct BulkLoad<'a> {
    store: &'a IndexStore,
}

impl BulkLoad<'_> {
    /// Leave bulk-load mode and report whether the deferred writes reached disk.
    pub fn finish(self) -> Result<()> {
        let store = self.store;
        drop(self);
        store.flush()
    }
}

impl Drop for BulkLoad<'_> {
    fn drop(&mut self) {
        if self.store.bulk_depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Err(err) = self.store.db.flush() {
                tracing::error!(error = %err, "flush after bulk load failed");
            }
            tracing::debug!("bulk load mode disabled");
        }
    }
}

fn add_frequency(_key: &[u8], existing: Option<&[u8]>, delta: &[u8]) -> Option<Vec<u8>> {
    let read = |bytes: &[u8]| <[u8; 4]>::try_from(bytes).map(u32::from_be_bytes).unwrap_or(0);
    let total = existing.map(read).unwrap_or(0).saturating_add(read(delta));
    Some(total.to_be_bytes().to_vec())
}

fn posting_key(major: u64, minor: u64, page: u32) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..8].copy_from_slice(&major.to_be_bytes());
    key[8..16].copy_from_slice(&minor.to_be_bytes());
    key[16..].copy_from_slice(&page.to_be_bytes());
    key
}

fn split_key(key: &[u8], tree: &'static str) -> Result<(u64, u64, u32)> {
    if key.len() != 20 {
        return Err(corrupt(tree, format!("key of {} bytes", key.len())));
    }
    Ok((decode_id(&key[..8], tree)?, decode_id(&key[8..16], tree)?, decode_frequency(&key[16..], tree)?))
}

fn decode_id(bytes: &[u8], tree: &'static str) -> Result<u64> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| corrupt(tree, format!("id of {} bytes", bytes.len())))
}

fn decode_frequency(bytes: &[u8], tree: &'static str) -> Result<u32> {
    <[u8; 4]>::try_from(bytes)
        .map(u32::from_be_bytes)
        .map_err(|_| corrupt(tree, format!("u32 of {} bytes", bytes.len())))
}

fn decode_path(bytes: &IVec) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| corrupt(DOCUMENTS, e.to_string()))
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    if raw.trim().is_empty() {
        return Ok(Metadata::new());
    }
    Ok(serde_json::from_str(raw)?)
}

fn corrupt(tree: &'static str, reason: String) -> Error {
    Error::CorruptEntry { tree, reason }
}
