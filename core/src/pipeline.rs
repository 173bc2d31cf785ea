use crate::discovery::discover;
use crate::error::{ExtractError, Result};
use crate::extract::ExtractorRegistry;
use crate::identity::{identity_path, next_id, RenameMode};
use crate::index::{stamp, Metadata, IDENTITY, LAST_ERROR, LAST_INDEXED, ORIGINAL_NAME};
use crate::persist::IndexStore;
use crate::tokenizer::tokenize;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Outcome of one indexing request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Unclaimed files found under the root.
    pub discovered: usize,
    /// Files whose postings were committed and that now carry their ID.
    pub indexed: usize,
    /// Files without a registered extractor; left untouched.
    pub unsupported: usize,
    /// Files that could not be read or renamed; left untouched.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reindexed {
    Refreshed,
    /// The file is gone; its document was dropped from the index.
    Deleted,
    /// The file exists but could not be extracted this time.
    Failed,
}

/// Path as used for document identity in the store.
pub fn document_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Count term occurrences of one page.
pub fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut tf: HashMap<String, u32> = HashMap::new();
    for term in tokenize(text) {
        *tf.entry(term).or_insert(0) += 1;
    }
    tf
}

pub struct Indexer<'a> {
    store: &'a IndexStore,
    extractors: &'a ExtractorRegistry,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a IndexStore, extractors: &'a ExtractorRegistry) -> Self {
        Self { store, extractors }
    }

    /// Discover, extract, index and finally claim every unclaimed file under
    /// `root`.
    ///
    /// A file is renamed to its ID only after its postings have been flushed,
    /// so a file that fails extraction keeps its name and is found again by
    /// the next scan. A store error aborts the batch and removes whatever was
    /// staged for it; nothing has been renamed at that point.
    pub fn index_path(&self, root: &Path, recursive: bool, mode: RenameMode) -> Result<IndexReport> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let files = discover(&root, recursive);
        let mut report = IndexReport { discovered: files.len(), ..IndexReport::default() };
        if files.is_empty() {
            return Ok(report);
        }

        let mut claimed: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());
        let bulk = self.store.bulk_load();
        let committed = self.stage(files, mode, &mut report, &mut claimed).and_then(|()| bulk.finish());
        if let Err(err) = committed {
            tracing::error!(root = %root.display(), staged = claimed.len(), error = %err, "indexing aborted, discarding batch");
            self.discard(&claimed);
            return Err(err);
        }

        let mut removal_error = None;
        for (file, target) in claimed {
            match fs::rename(&file, &target) {
                Ok(()) => report.indexed += 1,
                Err(err) => {
                    tracing::warn!(path = %file.display(), error = %err, "could not claim file, dropping its postings");
                    report.failed += 1;
                    if let Err(err) = self.store.remove_document(&document_key(&target)) {
                        tracing::error!(path = %target.display(), error = %err, "could not drop unclaimed document");
                        removal_error.get_or_insert(err);
                    }
                }
            }
        }
        if let Some(err) = removal_error {
            return Err(err);
        }

        tracing::info!(
            root = %root.display(),
            discovered = report.discovered,
            indexed = report.indexed,
            unsupported = report.unsupported,
            failed = report.failed,
            "indexing complete"
        );
        Ok(report)
    }

    /// Extract and upsert every file under its planned identity path. A file
    /// is pushed onto `claimed` before its first write so a failure halfway
    /// through it can still be discarded.
    fn stage(
        &self,
        files: Vec<PathBuf>,
        mode: RenameMode,
        report: &mut IndexReport,
        claimed: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<()> {
        let mut last_id = String::new();
        for file in files {
            let pages = match self.extractors.extract(&file) {
                Ok(pages) => pages,
                Err(ExtractError::Unsupported { extension }) => {
                    tracing::debug!(path = %file.display(), extension = %extension, "no extractor, skipping");
                    report.unsupported += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(path = %file.display(), error = %err, "extraction failed, skipping");
                    report.failed += 1;
                    continue;
                }
            };

            let id = next_id(&last_id);
            let target = identity_path(&file, mode, &id);
            let key = document_key(&target);
            let name = file.file_name().map(|n| n.to_string_lossy().into_owned());
            claimed.push((file, target));
            self.store_pages(&key, &pages)?;

            let mut meta = Metadata::new();
            meta.insert(LAST_INDEXED.into(), stamp(OffsetDateTime::now_utc()));
            meta.insert(IDENTITY.into(), Value::String(id.clone()));
            if let Some(name) = name {
                meta.insert(ORIGINAL_NAME.into(), Value::String(name));
            }
            self.store.update_metadata(&key, &meta)?;
            last_id = id;
        }
        Ok(())
    }

    /// Best effort removal of staged documents after an aborted batch.
    fn discard(&self, claimed: &[(PathBuf, PathBuf)]) {
        for (_, target) in claimed {
            if let Err(err) = self.store.remove_document(&document_key(target)) {
                tracing::error!(path = %target.display(), error = %err, "could not discard staged document");
            }
        }
    }

    /// Rebuild the postings of an already indexed document from its current
    /// contents and stamp it as fresh.
    pub fn reindex_document(&self, path: &str) -> Result<Reindexed> {
        let file = Path::new(path);
        if !file.is_file() {
            self.store.remove_document(path)?;
            return Ok(Reindexed::Deleted);
        }

        let mut meta = Metadata::new();
        meta.insert(LAST_INDEXED.into(), stamp(OffsetDateTime::now_utc()));
        let outcome = match self.extractors.extract(file) {
            Ok(pages) => {
                self.store.clear_postings(path)?;
                self.store_pages(path, &pages)?;
                meta.insert(LAST_ERROR.into(), Value::Null);
                Reindexed::Refreshed
            }
            Err(err) => {
                // stamped anyway so the document waits a full window before the next attempt
                tracing::warn!(path, error = %err, "reindex failed");
                meta.insert(LAST_ERROR.into(), Value::String(err.to_string()));
                Reindexed::Failed
            }
        };
        self.store.update_metadata(path, &meta)?;
        Ok(outcome)
    }

    /// Upsert the postings of every page, numbering pages from 1. A document
    /// without pages is still recorded so its metadata has a home.
    fn store_pages(&self, key: &str, pages: &[String]) -> Result<()> {
        if pages.is_empty() {
            self.store.upsert_postings(key, 1, &HashMap::new())?;
            return Ok(());
        }
        for (page, text) in (1u32..).zip(pages) {
            self.store.upsert_postings(key, page, &term_frequencies(text))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Format;

    #[test]
    fn page_terms_are_counted() {
        let tf = term_frequencies("Apple pie, apple tart; the APPLE.");
        assert_eq!(tf["apple"], 3);
        assert_eq!(tf["pie"], 1);
        assert!(!tf.contains_key("the"));
    }

    #[test]
    fn empty_documents_are_still_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir(&docs).unwrap();
        fs::write(docs.join("blank.txt"), "").unwrap();
        let store = IndexStore::open(tmp.path().join("index")).unwrap();
        let extractors = ExtractorRegistry::default();

        let report = Indexer::new(&store, &extractors).index_path(&docs, false, RenameMode::Append).unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn reindex_replaces_postings() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("note.txt");
        fs::write(&file, "plum plum").unwrap();
        let store = IndexStore::open(tmp.path().join("index")).unwrap();
        let extractors = ExtractorRegistry::default();
        let indexer = Indexer::new(&store, &extractors);
        let key = document_key(&file);

        store.upsert_postings(&key, 1, &term_frequencies("plum plum")).unwrap();
        fs::write(&file, "plum fig").unwrap();
        assert_eq!(indexer.reindex_document(&key).unwrap(), Reindexed::Refreshed);
        assert_eq!(store.lookup("plum").unwrap()[0].frequency, 1);
        assert_eq!(store.lookup("fig").unwrap().len(), 1);

        let meta = store.get_metadata(&key).unwrap().unwrap();
        assert!(crate::index::last_indexed(&meta).is_some());
        assert_eq!(meta[LAST_ERROR], Value::Null);

        fs::remove_file(&file).unwrap();
        assert_eq!(indexer.reindex_document(&key).unwrap(), Reindexed::Deleted);
        assert!(store.get_metadata(&key).unwrap().is_none());
    }

    #[test]
    fn failed_reindex_keeps_postings_and_records_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("scan.txt");
        fs::write(&file, "pear").unwrap();
        let store = IndexStore::open(tmp.path().join("index")).unwrap();
        let mut extractors = ExtractorRegistry::default();
        extractors.register(Format::Text, |path: &Path| -> std::result::Result<Vec<String>, ExtractError> {
            Err(ExtractError::Corrupt { path: path.to_path_buf(), reason: "truncated".into() })
        });
        let key = document_key(&file);
        store.upsert_postings(&key, 1, &term_frequencies("pear")).unwrap();

        let outcome = Indexer::new(&store, &extractors).reindex_document(&key).unwrap();
        assert_eq!(outcome, Reindexed::Failed);
        assert_eq!(store.lookup("pear").unwrap().len(), 1);

        let meta = store.get_metadata(&key).unwrap().unwrap();
        assert!(crate::index::last_indexed(&meta).is_some());
        let error = meta[LAST_ERROR].as_str().unwrap();
        assert!(error.contains("truncated"));
    }

    #[test]
    fn store_failure_discards_the_staged_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir(&docs).unwrap();
        fs::write(docs.join("a.txt"), "apple").unwrap();
        fs::write(docs.join("b.txt"), "apple broken").unwrap();
        let store = IndexStore::open(tmp.path().join("index")).unwrap();
        store.corrupt_token("broken").unwrap();
        let extractors = ExtractorRegistry::default();

        let err = Indexer::new(&store, &extractors).index_path(&docs, false, RenameMode::Append).unwrap_err();
        assert!(matches!(err, crate::error::Error::CorruptEntry { .. }));

        // nothing points at a path that does not exist, and nothing was claimed
        assert_eq!(store.document_count(), 0);
        assert!(store.lookup("apple").unwrap().is_empty());
        assert!(docs.join("a.txt").is_file());
        assert!(docs.join("b.txt").is_file());
        assert_eq!(discover(&docs, false).len(), 2);
    }
}
