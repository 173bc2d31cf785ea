//! The watchdog: keeps the index fresh one small batch at a time.

use crate::error::Result;
use crate::extract::ExtractorRegistry;
use crate::identity::RenameMode;
use crate::index::last_indexed;
use crate::persist::IndexStore;
use crate::pipeline::{Indexer, Reindexed};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};

/// Documents not indexed for this long are due again.
pub const STALENESS_WINDOW: Duration = Duration::days(14);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub reindexed: usize,
    pub deleted: usize,
    pub newly_indexed: usize,
}

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub batch_size: usize,
    /// Walk worklist roots recursively.
    pub recursive: bool,
    /// Newline separated roots queued for first time indexing.
    pub worklist: PathBuf,
}

/// Up to `batch_size` documents whose last indexing is older than the
/// staleness window, oldest first. Documents never stamped come first.
pub fn select_stale(store: &IndexStore, now: OffsetDateTime, batch_size: usize) -> Result<Vec<String>> {
    let cutoff = now - STALENESS_WINDOW;
    let mut stale: Vec<(Option<OffsetDateTime>, String)> = store
        .documents()?
        .into_iter()
        .map(|(path, meta)| (last_indexed(&meta), path))
        .filter(|(stamped, _)| stamped.map_or(true, |at| at <= cutoff))
        .collect();
    stale.sort();
    stale.truncate(batch_size);
    Ok(stale.into_iter().map(|(_, path)| path).collect())
}

/// Reindex one batch of stale documents, then index every root listed in the
/// worklist. Per-document failures are logged and counted as neither
/// reindexed nor deleted; store errors abort the run.
pub fn run_refresh(store: &IndexStore, extractors: &ExtractorRegistry, options: &RefreshOptions) -> Result<RefreshReport> {
    let indexer = Indexer::new(store, extractors);
    let mut report = RefreshReport::default();

    let due = select_stale(store, OffsetDateTime::now_utc(), options.batch_size)?;
    {
        let bulk = store.bulk_load();
        for path in &due {
            match indexer.reindex_document(path)? {
                Reindexed::Refreshed => report.reindexed += 1,
                Reindexed::Deleted => report.deleted += 1,
                Reindexed::Failed => {}
            }
        }
        bulk.finish()?;
    }

    report.newly_indexed = drain_worklist(&indexer, &options.worklist, options.recursive)?;
    tracing::info!(
        due = due.len(),
        reindexed = report.reindexed,
        deleted = report.deleted,
        newly_indexed = report.newly_indexed,
        "refresh complete"
    );
    Ok(report)
}

/// Index every root named in the worklist file. The file is created when
/// missing and is left as is afterwards.
fn drain_worklist(indexer: &Indexer<'_>, worklist: &Path, recursive: bool) -> Result<usize> {
    if let Some(dir) = worklist.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(worklist)?;

    let mut indexed = 0;
    for line in fs::read_to_string(worklist)?.lines() {
        let root = line.trim();
        if root.is_empty() {
            continue;
        }
        indexed += indexer.index_path(Path::new(root), recursive, RenameMode::Append)?.indexed;
    }
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{stamp, Metadata, LAST_INDEXED};
    use std::collections::HashMap;

    fn store_with(docs: &[(&str, Option<i64>)], now: OffsetDateTime) -> (tempfile::TempDir, IndexStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = IndexStore::open(tmp.path().join("index")).unwrap();
        for (path, age_days) in docs {
            store.upsert_postings(path, 1, &HashMap::from([("fruit".to_string(), 1)])).unwrap();
            if let Some(days) = age_days {
                let mut meta = Metadata::new();
                meta.insert(LAST_INDEXED.into(), stamp(now - Duration::days(*days)));
                store.update_metadata(path, &meta).unwrap();
            }
        }
        (tmp, store)
    }

    #[test]
    fn unstamped_first_then_oldest() {
        let now = OffsetDateTime::now_utc();
        let (_tmp, store) = store_with(&[("/d/old", Some(20)), ("/d/fresh", Some(5)), ("/d/never", None)], now);
        assert_eq!(select_stale(&store, now, 2).unwrap(), vec!["/d/never", "/d/old"]);
    }

    #[test]
    fn fresh_documents_are_never_selected() {
        let now = OffsetDateTime::now_utc();
        let (_tmp, store) = store_with(&[("/d/a", Some(1)), ("/d/b", Some(13))], now);
        assert!(select_stale(&store, now, 10).unwrap().is_empty());
    }

    #[test]
    fn missing_files_are_dropped_and_worklist_created() {
        let now = OffsetDateTime::now_utc();
        let (tmp, store) = store_with(&[("/nowhere/gone.txt", Some(30))], now);
        let worklist = tmp.path().join("watchdog.txt");
        let options = RefreshOptions { batch_size: 5, recursive: false, worklist: worklist.clone() };

        let report = run_refresh(&store, &ExtractorRegistry::default(), &options).unwrap();
        assert_eq!(report, RefreshReport { reindexed: 0, deleted: 1, newly_indexed: 0 });
        assert!(worklist.exists());
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn stale_files_are_reindexed_and_restamped() {
        let now = OffsetDateTime::now_utc();
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("ledger ★ 1.txt");
        fs::write(&file, "fig fig").unwrap();
        let key = file.to_string_lossy().into_owned();
        let (_index_dir, store) = store_with(&[(key.as_str(), Some(20))], now);

        let options = RefreshOptions { batch_size: 5, recursive: false, worklist: tmp.path().join("watchdog.txt") };
        let report = run_refresh(&store, &ExtractorRegistry::default(), &options).unwrap();
        assert_eq!(report, RefreshReport { reindexed: 1, deleted: 0, newly_indexed: 0 });

        assert_eq!(store.lookup("fruit").unwrap().len(), 0);
        assert_eq!(store.lookup("fig").unwrap()[0].frequency, 2);
        let stamped = last_indexed(&store.get_metadata(&key).unwrap().unwrap()).unwrap();
        assert!(stamped > now - Duration::days(1));
        assert!(select_stale(&store, OffsetDateTime::now_utc(), 5).unwrap().is_empty());
    }

    #[test]
    fn worklist_roots_are_indexed() {
        let tmp = tempfile::tempdir().unwrap();
        let inbox = tmp.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        fs::write(inbox.join("one.txt"), "quince").unwrap();
        fs::write(inbox.join("two.md"), "quince jam").unwrap();
        let worklist = tmp.path().join("watchdog.txt");
        fs::write(&worklist, format!("{}\n\n/no/such/root\n", inbox.display())).unwrap();
        let store = IndexStore::open(tmp.path().join("index")).unwrap();

        let options = RefreshOptions { batch_size: 5, recursive: false, worklist };
        let report = run_refresh(&store, &ExtractorRegistry::default(), &options).unwrap();
        assert_eq!(report.newly_indexed, 2);
        assert_eq!(store.lookup("quince").unwrap().len(), 2);
        assert!(!inbox.join("one.txt").exists());

        // claimed files are not picked up twice
        let again = run_refresh(&store, &ExtractorRegistry::default(), &options).unwrap();
        assert_eq!(again, RefreshReport::default());
    }
}
