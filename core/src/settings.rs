use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// User preferences persisted as JSON next to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Descend into sub-folders when indexing.
    pub recursive: bool,
    /// Replace the whole file name with the ID instead of appending it.
    pub replace_filename: bool,
    /// Documents refreshed per home-page visit.
    pub watchdog_number: usize,
    /// Keep `AND`/`OR`/`NOT` and parentheses out of spelling correction.
    pub protect_operators: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { recursive: false, replace_filename: false, watchdog_number: 50, protect_operators: true }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read-modify-write: apply `change` to the stored settings and save them.
    pub fn update(path: &Path, change: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let mut settings = Self::load(path)?;
        change(&mut settings);
        settings.save(path)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let s = Settings::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.watchdog_number, 50);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"recursive": true}"#).unwrap();
        let s = Settings::load(&path).unwrap();
        assert!(s.recursive);
        assert!(s.protect_operators);
    }

    #[test]
    fn update_keeps_untouched_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        Settings::update(&path, |s| s.watchdog_number = 7).unwrap();
        let s = Settings::update(&path, |s| s.recursive = true).unwrap();
        assert_eq!(s.watchdog_number, 7);
        assert!(s.recursive);
    }
}
