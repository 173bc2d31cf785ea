//! File identity: a timestamp ID embedded in the file name behind a marker.
//!
//! A file whose name contains [`MARKER`] has been claimed and is never picked
//! up by discovery again.

use crate::discovery::is_excluded;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;
use walkdir::WalkDir;

pub const MARKER: char = '★';

/// Ledger written by [`assign_ids`] into the folder it renamed files in.
pub const ID_LOG_FILE: &str = "_log.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameMode {
    /// `report.pdf` becomes `report ★ 240305141503.123456.pdf`.
    #[default]
    Append,
    /// `report.pdf` becomes `★ 240305141503.123456.pdf`.
    Replace,
}

impl RenameMode {
    pub fn from_replace_flag(replace_full: bool) -> Self {
        if replace_full {
            RenameMode::Replace
        } else {
            RenameMode::Append
        }
    }
}

pub fn has_identity(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().contains(MARKER))
        .unwrap_or(false)
}

/// A fresh ID in `YYMMDDHHMMSS.ffffff` form from the local clock.
///
/// Falls back to UTC when the local offset cannot be determined.
pub fn generate_id() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_id(now)
}

/// A fresh ID guaranteed to differ from `previous`, for claiming several
/// files within the same microsecond.
pub fn next_id(previous: &str) -> String {
    loop {
        let id = generate_id();
        if id != previous {
            return id;
        }
    }
}

pub fn format_id(at: OffsetDateTime) -> String {
    let format = format_description!("[year repr:last_two][month][day][hour][minute][second].[subsecond digits:6]");
    // all components are fixed-width numerics, formatting cannot fail
    at.format(&format).unwrap_or_default()
}

/// The path `path` would be renamed to when claimed with `id`.
pub fn identity_path(path: &Path, mode: RenameMode, id: &str) -> PathBuf {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let name = match mode {
        RenameMode::Replace => format!("{MARKER} {id}{ext}"),
        RenameMode::Append => {
            let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            format!("{stem} {MARKER} {id}{ext}")
        }
    };
    path.with_file_name(name)
}

/// Claim `path` immediately by renaming it in place. Returns the new path.
///
/// No collision check is made; IDs have microsecond resolution.
pub fn assign_identity(path: &Path, mode: RenameMode) -> Result<PathBuf> {
    let new_path = identity_path(path, mode, &generate_id());
    fs::rename(path, &new_path)?;
    tracing::debug!(from = %path.display(), to = %new_path.display(), "assigned identity");
    Ok(new_path)
}

/// Claim every unclaimed file directly inside `dir` without indexing it,
/// recording `original_name,ID,extension` per file in [`ID_LOG_FILE`].
pub fn assign_ids(dir: &Path, mode: RenameMode) -> Result<Vec<PathBuf>> {
    let candidates = crate::discovery::discover(dir, false);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let file = OpenOptions::new().create(true).append(true).open(dir.join(ID_LOG_FILE))?;
    let mut log = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    let mut renamed = Vec::with_capacity(candidates.len());
    let mut last_id = String::new();
    for path in candidates {
        let id = next_id(&last_id);
        let new_path = identity_path(&path, mode, &id);
        fs::rename(&path, &new_path)?;
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
        log.write_record([&*name, id.as_str(), ext.as_str()])?;
        renamed.push(new_path);
        last_id = id;
    }
    log.flush()?;
    tracing::info!(dir = %dir.display(), files = renamed.len(), "assigned ids");
    Ok(renamed)
}

/// The name a claimed file had before it was claimed in append mode.
/// Files claimed in replace mode lost their stem and yield `None`.
pub fn original_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    let (stem, claimed) = name.split_once(&format!(" {MARKER}"))?;
    // whatever follows `<seconds>.<fraction>` is the original extension
    let seconds = claimed.trim_start().trim_start_matches(|c: char| c.is_ascii_digit());
    let ext = match seconds.strip_prefix('.') {
        Some(fraction) if fraction.starts_with(|c: char| c.is_ascii_digit()) => {
            fraction.trim_start_matches(|c: char| c.is_ascii_digit())
        }
        _ => seconds,
    };
    Some(path.with_file_name(format!("{stem}{ext}")))
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Unclaimed {
    /// `(claimed, original)` pairs that were renamed back.
    pub restored: Vec<(PathBuf, PathBuf)>,
    /// Claimed files left alone: the original name is taken or unknown.
    pub skipped: Vec<PathBuf>,
}

/// Strip the identity from every claimed file below `root`, restoring the
/// original file names. Recurses into every sub-folder.
pub fn unclaim(root: &Path) -> Result<Unclaimed> {
    let mut outcome = Unclaimed::default();
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "unclaim root does not exist");
        return Ok(outcome);
    }
    let walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();
    for entry in walker.filter_entry(|e| !is_excluded(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_identity(entry.path()) {
            continue;
        }
        let claimed = entry.into_path();
        match original_path(&claimed) {
            Some(original) if !original.exists() => {
                fs::rename(&claimed, &original)?;
                tracing::debug!(from = %claimed.display(), to = %original.display(), "restored name");
                outcome.restored.push((claimed, original));
            }
            _ => {
                tracing::info!(path = %claimed.display(), "original name unavailable, skipping");
                outcome.skipped.push(claimed);
            }
        }
    }
    tracing::info!(
        root = %root.display(),
        restored = outcome.restored.len(),
        skipped = outcome.skipped.len(),
        "unclaimed files"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn id_is_fixed_width_and_sortable() {
        let early = format_id(datetime!(2024-03-05 14:15:03.000042 UTC));
        let late = format_id(datetime!(2024-03-05 14:15:03.5 UTC));
        assert_eq!(early, "240305141503.000042");
        assert_eq!(late, "240305141503.500000");
        assert!(early < late);
        assert_eq!(generate_id().len(), "YYMMDDHHMMSS.ffffff".len());
    }

    #[test]
    fn append_mode_keeps_stem() {
        let p = identity_path(Path::new("/docs/report.pdf"), RenameMode::Append, "240305141503.000042");
        assert_eq!(p, PathBuf::from("/docs/report ★ 240305141503.000042.pdf"));
        assert!(has_identity(&p));
    }

    #[test]
    fn replace_mode_drops_stem() {
        let p = identity_path(Path::new("/docs/report.pdf"), RenameMode::Replace, "240305141503.000042");
        assert_eq!(p, PathBuf::from("/docs/★ 240305141503.000042.pdf"));
    }

    #[test]
    fn extensionless_files_get_no_dot() {
        let p = identity_path(Path::new("/docs/README"), RenameMode::Append, "1");
        assert_eq!(p, PathBuf::from("/docs/README ★ 1"));
    }

    #[test]
    fn assign_ids_renames_and_logs() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        fs::write(tmp.path().join("b ★ 1.txt"), "claimed").unwrap();

        let renamed = assign_ids(tmp.path(), RenameMode::Append).unwrap();
        assert_eq!(renamed.len(), 1);
        assert!(has_identity(&renamed[0]));
        assert!(!tmp.path().join("a.txt").exists());

        let log = fs::read_to_string(tmp.path().join(ID_LOG_FILE)).unwrap();
        assert!(log.starts_with("a.txt,"));
        assert!(log.trim_end().ends_with(",.txt"));

        // second run finds nothing and the ledger is not picked up as a document
        assert!(assign_ids(tmp.path(), RenameMode::Append).unwrap().is_empty());
    }

    #[test]
    fn ledger_quotes_names_with_commas() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("Report, final.txt"), "q3").unwrap();
        fs::write(tmp.path().join("plain.txt"), "q4").unwrap();
        assign_ids(tmp.path(), RenameMode::Replace).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(tmp.path().join(ID_LOG_FILE))
            .unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.len() == 3));
        assert_eq!(&rows[0][0], "Report, final.txt");
        assert_eq!(&rows[0][2], ".txt");
        assert_eq!(&rows[1][0], "plain.txt");
    }

    #[test]
    fn assign_identity_renames_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("memo.txt");
        fs::write(&file, "memo").unwrap();

        let claimed = assign_identity(&file, RenameMode::Replace).unwrap();
        assert!(!file.exists());
        assert!(claimed.is_file());
        assert_eq!(claimed.parent(), file.parent());
        let name = claimed.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("★ "));
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn original_path_strips_the_identity() {
        let claimed = Path::new("/docs/report ★ 240305141503.000042.pdf");
        assert_eq!(original_path(claimed), Some(PathBuf::from("/docs/report.pdf")));
        assert_eq!(original_path(Path::new("/docs/★ 240305141503.000042.pdf")), None);
        assert_eq!(original_path(Path::new("/docs/README ★ 1")), Some(PathBuf::from("/docs/README")));
        let bare = Path::new("/docs/README ★ 240305141503.000042");
        assert_eq!(original_path(bare), Some(PathBuf::from("/docs/README")));
        let dotted = Path::new("/docs/v1.2 notes.tar ★ 240305141503.000042.gz");
        assert_eq!(original_path(dotted), Some(PathBuf::from("/docs/v1.2 notes.tar.gz")));
    }

    #[test]
    fn unclaim_restores_names_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(tmp.path().join("a ★ 1.txt"), "a").unwrap();
        fs::write(nested.join("b ★ 2.md"), "b").unwrap();
        // original name already taken
        fs::write(tmp.path().join("c.txt"), "new c").unwrap();
        fs::write(tmp.path().join("c ★ 3.txt"), "old c").unwrap();
        // replace mode, original stem unknown
        fs::write(tmp.path().join("★ 4.txt"), "d").unwrap();

        let outcome = unclaim(tmp.path()).unwrap();
        assert_eq!(outcome.restored.len(), 2);
        assert!(tmp.path().join("a.txt").is_file());
        assert!(nested.join("b.md").is_file());
        assert_eq!(fs::read_to_string(tmp.path().join("c.txt")).unwrap(), "new c");
        assert_eq!(outcome.skipped, vec![tmp.path().join("c ★ 3.txt"), tmp.path().join("★ 4.txt")]);
    }
}
