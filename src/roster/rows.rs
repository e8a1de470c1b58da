//! Mailing-list sources: CSV expansion and row loading.

use crate::models::{MailshotError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One mailing-list row, immutable once read.
///
/// `row_index` is the 0-based record position below the header and the unit
/// of resumability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRow {
    pub source_file: PathBuf,
    pub row_index: u64,
    /// May pack several mailboxes separated by `/` or `,`.
    pub to: String,
    pub name: String,
    /// Columns beyond `to` and `name`, passed through untouched.
    pub extra: BTreeMap<String, String>,
}

/// Expand configured sources in order: files stay as-is, directories are
/// searched recursively for `.csv` files in sorted order.
pub fn expand_sources(sources: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for source in sources {
        let meta = std::fs::metadata(source)
            .map_err(|e| MailshotError::io(format!("reading {}", source.display()), e))?;

        if meta.is_dir() {
            let pattern = source.join("**").join("*.csv");
            let pattern = pattern.to_string_lossy().into_owned();
            let mut found: Vec<PathBuf> = glob::glob(&pattern)
                .map_err(|e| MailshotError::Parse(format!("Bad glob pattern {pattern}: {e}")))?
                .filter_map(|entry| entry.ok())
                .collect();
            found.sort();
            debug!(dir = %source.display(), count = found.len(), "Expanded mailing-list directory");
            files.extend(found);
        } else {
            files.push(source.clone());
        }
    }

    Ok(files)
}

/// Parse every row of one CSV source.
///
/// The header must contain `to` and `name`; anything else is kept as a
/// free-form extra field. Malformed CSV is a structural fault and fails the
/// whole source.
pub fn load_rows(path: &Path) -> Result<Vec<RecipientRow>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| MailshotError::Parse(format!("{}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| MailshotError::Parse(format!("{}: {}", path.display(), e)))?
        .clone();

    let column = |name: &str| headers.iter().position(|h| h == name);
    let to_idx = column("to").ok_or_else(|| {
        MailshotError::Parse(format!("{}: missing \"to\" column", path.display()))
    })?;
    let name_idx = column("name").ok_or_else(|| {
        MailshotError::Parse(format!("{}: missing \"name\" column", path.display()))
    })?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| MailshotError::Parse(format!("{}: {}", path.display(), e)))?;

        let mut extra = BTreeMap::new();
        for (j, field) in record.iter().enumerate() {
            if j == to_idx || j == name_idx {
                continue;
            }
            if let Some(header) = headers.get(j) {
                extra.insert(header.to_string(), field.to_string());
            }
        }

        rows.push(RecipientRow {
            source_file: path.to_path_buf(),
            row_index: i as u64,
            to: record.get(to_idx).unwrap_or_default().to_string(),
            name: record.get(name_idx).unwrap_or_default().to_string(),
            extra,
        });
    }

    Ok(rows)
}
