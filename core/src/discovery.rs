use crate::identity::{has_identity, ID_LOG_FILE};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Names never descended into or returned: version control metadata and the
/// files this application writes next to the documents it manages.
const EXCLUDED_NAMES: &[&str] = &[".git", ".hg", ".svn", "config.json", "watchdog.txt", ID_LOG_FILE, "!automatic_id.py"];

pub(crate) fn is_excluded(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| EXCLUDED_NAMES.contains(&name))
        .unwrap_or(false)
}

/// Find every file below `root` that has not been claimed yet.
///
/// Only the top level is scanned unless `recursive` is set. A missing or
/// unreadable root yields no files. Symlinks are followed; a link that loops
/// back onto one of its ancestors is reported and skipped.
pub fn discover(root: &Path, recursive: bool) -> Vec<PathBuf> {
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "discovery root does not exist");
        return Vec::new();
    }

    let mut walker = WalkDir::new(root).min_depth(1).follow_links(true).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker.into_iter().filter_entry(|e| !is_excluded(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && !has_identity(entry.path()) {
            files.push(entry.into_path());
        }
    }
    tracing::debug!(root = %root.display(), recursive, files = files.len(), "discovered unclaimed files");
    files
}
