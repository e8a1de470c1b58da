//! Checkpoint module for resumable campaign dispatch.
//!
//! Provides:
//! - `CampaignCheckpoint` / `CheckpointStore`: cursor and failure tracking per
//!   mailing-list source, persisted after every batch
//! - `ResourceCache` / `ResourceCacheStore`: provider-side resource ids
//!   resolved once per logical name

mod cache;
mod state;

pub use cache::*;
pub use state::*;

use crate::models::{MailshotError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Load a JSON state file, starting fresh when it is absent or unreadable.
pub(crate) fn load_json_or_default<T>(path: &Path, what: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No {what} file, starting fresh");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable {what} file, starting fresh");
            return T::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt {what} file, starting fresh");
            T::default()
        }
    }
}

/// Persist a JSON state file atomically (write to a temp file, then rename).
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    let temp_path = match path.extension() {
        Some(ext) => {
            let mut ext = ext.to_os_string();
            ext.push(".tmp");
            path.with_extension(ext)
        }
        None => path.with_extension("tmp"),
    };

    let file = fs::File::create(&temp_path)
        .map_err(|e| MailshotError::io(format!("creating {}", temp_path.display()), e))?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, state)
        .map_err(|e| MailshotError::Internal(format!("Serializing {}: {}", path.display(), e)))?;

    fs::rename(&temp_path, path)
        .map_err(|e| MailshotError::io(format!("renaming into {}", path.display()), e))?;

    Ok(())
}
