//! Extension → MIME type table.
//!
//! Loaded once at startup from a plain text file, one `ext type` pair per
//! line. `#` starts a comment line; blank lines are ignored.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use thiserror::Error;

/// Served when the extension is missing or unknown.
pub const DEFAULT_MIME: &str = "text/plain; charset=UTF-8";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("mime table line {line}: extension \"{ext}\" has no type")]
pub struct MimeTableError {
    pub line: usize,
    pub ext: String,
}

#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    types: HashMap<String, String>,
}

impl MimeTable {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading mime table {}", path.display()))?;
        Ok(Self::parse(&text)?)
    }

    pub fn parse(text: &str) -> Result<Self, MimeTableError> {
        let mut types = HashMap::new();

        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (ext, mime) = match line.split_once([' ', '\t']) {
                Some((ext, mime)) if !mime.trim().is_empty() => (ext, mime.trim()),
                _ => {
                    return Err(MimeTableError {
                        line: i + 1,
                        ext: line.to_string(),
                    });
                }
            };
            types.insert(ext.to_string(), mime.to_string());
        }

        Ok(Self { types })
    }

    pub fn lookup(&self, ext: &str) -> Option<&str> {
        self.types.get(ext).map(String::as_str)
    }

    /// MIME type for a file path, by its last extension.
    pub fn for_path(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.lookup(ext))
            .unwrap_or(DEFAULT_MIME)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
