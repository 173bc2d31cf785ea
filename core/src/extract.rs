//! Text extraction is delegated to per-format extractors registered at
//! startup. The engine only ever asks for "the pages of text in this file".

use crate::error::ExtractError;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Pdf,
    Docx,
    Pptx,
    Text,
    Markdown,
}

impl Format {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "pptx" => Some(Format::Pptx),
            "txt" => Some(Format::Text),
            "md" => Some(Format::Markdown),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Pdf => "pdf",
            Format::Docx => "docx",
            Format::Pptx => "pptx",
            Format::Text => "text",
            Format::Markdown => "markdown",
        };
        f.write_str(name)
    }
}

/// Produces the text of a document, one string per page or slide.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractError>;
}

impl<F> Extractor for F
where
    F: Fn(&Path) -> Result<Vec<String>, ExtractError> + Send + Sync,
{
    fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        self(path)
    }
}

/// Reads the whole file as a single page. Invalid UTF-8 is replaced rather
/// than rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainText;

impl Extractor for PlainText {
    fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let bytes = std::fs::read(path).map_err(|source| ExtractError::Unreadable { path: path.to_path_buf(), source })?;
        Ok(vec![String::from_utf8_lossy(&bytes).into_owned()])
    }
}

#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<Format, Arc<dyn Extractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Format::Text, PlainText);
        registry.register(Format::Markdown, PlainText);
        registry
    }
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self { extractors: HashMap::new() }
    }

    /// Install (or replace) the extractor used for `format`.
    pub fn register<E: Extractor + 'static>(&mut self, format: Format, extractor: E) -> &mut Self {
        self.extractors.insert(format, Arc::new(extractor));
        self
    }

    pub fn supports(&self, path: &Path) -> bool {
        Format::from_path(path).is_some_and(|f| self.extractors.contains_key(&f))
    }

    pub fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let extractor = Format::from_path(path)
            .and_then(|f| self.extractors.get(&f))
            .ok_or_else(|| ExtractError::Unsupported {
                extension: path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            })?;
        extractor.extract(path)
    }
}
