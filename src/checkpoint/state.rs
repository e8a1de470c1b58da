//! Campaign checkpoint: which rows of which mailing-list sources were handled.
//!
//! The whole document is rewritten atomically after every settled batch, so a
//! crash between batches loses at most the in-flight batch.

use crate::models::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Failure recorded for one mailing-list row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: u64,
    pub error: String,
}

/// Progress over one CSV source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCheckpoint {
    /// Highest row index handed to dispatch; rows at or below it are never
    /// re-derived.
    pub last_index: u64,
    pub done: bool,
    #[serde(default)]
    pub errors: Vec<RowError>,
}

/// Campaign-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Rows handed to dispatch across all runs.
    pub nb: u64,
    pub done: bool,
}

/// Whole-campaign progress, one entry per CSV source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignCheckpoint {
    pub metadata: CheckpointMetadata,
    pub data: BTreeMap<String, SourceCheckpoint>,
}

/// Where to pick a source up again: skip it, or resume after `last_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub done: bool,
    /// `None` for a source never checkpointed; its walk starts at row 0.
    pub last_index: Option<u64>,
}

/// What one settled batch did to a source.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Rows handed to dispatch in this batch.
    pub rows: u64,
    /// Highest row index in this batch.
    pub last_index: u64,
    pub is_partial: bool,
    pub failures: Vec<RowError>,
}

fn source_key(source: &Path) -> String {
    source.to_string_lossy().into_owned()
}

impl CampaignCheckpoint {
    /// Resume point for one source.
    pub fn resume_point(&self, source: &Path) -> ResumePoint {
        match self.data.get(&source_key(source)) {
            Some(entry) => ResumePoint {
                done: entry.done,
                last_index: Some(entry.last_index),
            },
            None => ResumePoint {
                done: false,
                last_index: None,
            },
        }
    }

    /// Fold a settled batch into the checkpoint.
    ///
    /// The cursor only moves forward, a newer failure replaces an older one
    /// recorded for the same row, and a source is done only when a complete
    /// batch settles without failures.
    pub fn record_batch(&mut self, source: &Path, outcome: &BatchOutcome) {
        let entry = self
            .data
            .entry(source_key(source))
            .or_insert_with(|| SourceCheckpoint {
                last_index: 0,
                done: false,
                errors: Vec::new(),
            });

        let mut errors: Vec<RowError> = entry
            .errors
            .drain(..)
            .filter(|old| !outcome.failures.iter().any(|new| new.row == old.row))
            .collect();
        errors.extend(outcome.failures.iter().cloned());
        errors.sort_by_key(|e| e.row);

        entry.errors = errors;
        entry.last_index = entry.last_index.max(outcome.last_index);
        entry.done = !outcome.is_partial && outcome.failures.is_empty();

        self.metadata.nb += outcome.rows;
        self.metadata.done = !self.data.is_empty() && self.data.values().all(|s| s.done);
    }

    /// Total failures recorded across all sources.
    pub fn failure_count(&self) -> usize {
        self.data.values().map(|s| s.errors.len()).sum()
    }
}

/// Persists the campaign checkpoint, one atomic rewrite per batch.
pub struct CheckpointStore {
    path: PathBuf,
    state: CampaignCheckpoint,
}

impl CheckpointStore {
    /// Open the checkpoint at `path`, starting fresh when it is absent or
    /// unreadable.
    pub fn open(path: &Path) -> Self {
        let state: CampaignCheckpoint = super::load_json_or_default(path, "checkpoint");

        if !state.data.is_empty() {
            info!(
                sources = state.data.len(),
                dispatched = state.metadata.nb,
                failures = state.failure_count(),
                "Resuming from checkpoint"
            );
        }

        Self {
            path: path.to_path_buf(),
            state,
        }
    }

    pub fn state(&self) -> &CampaignCheckpoint {
        &self.state
    }

    /// Fold a settled batch in and persist the whole checkpoint atomically.
    pub fn record_batch(&mut self, source: &Path, outcome: &BatchOutcome) -> Result<()> {
        self.state.record_batch(source, outcome);
        self.save()
    }

    /// Persist the current state (atomic write-then-rename).
    pub fn save(&self) -> Result<()> {
        super::write_json_atomic(&self.path, &self.state)?;
        debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outcome(rows: u64, last_index: u64, is_partial: bool, failures: Vec<RowError>) -> BatchOutcome {
        BatchOutcome {
            rows,
            last_index,
            is_partial,
            failures,
        }
    }

    #[test]
    fn absent_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(&dir.path().join("send.cache.json"));

        assert_eq!(store.state().metadata.nb, 0);
        assert!(!store.state().metadata.done);
        assert!(store.state().data.is_empty());
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("send.cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = CheckpointStore::open(&path);
        assert!(store.state().data.is_empty());
    }

    #[test]
    fn save_uses_original_wire_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("send.cache.json");

        let mut store = CheckpointStore::open(&path);
        store
            .record_batch(
                Path::new("lists/a.csv"),
                &outcome(
                    2,
                    1,
                    false,
                    vec![RowError {
                        row: 1,
                        error: "Wrong email format for \"to\" address: \"oops\"".to_string(),
                    }],
                ),
            )
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"metadata\""));
        assert!(raw.contains("\"nb\": 2"));
        assert!(raw.contains("\"lastIndex\": 1"));
        assert!(raw.contains("\"errors\""));
        assert!(raw.contains("\"row\": 1"));
        assert!(!raw.contains("last_index"));

        let reloaded = CheckpointStore::open(&path);
        let entry = &reloaded.state().data["lists/a.csv"];
        assert_eq!(entry.last_index, 1);
        assert!(!entry.done);
        assert_eq!(entry.errors.len(), 1);
    }

    #[test]
    fn clean_complete_batch_marks_source_done() {
        let mut state = CampaignCheckpoint::default();
        state.record_batch(Path::new("a.csv"), &outcome(3, 2, false, vec![]));

        let entry = &state.data["a.csv"];
        assert!(entry.done);
        assert_eq!(entry.last_index, 2);
        assert_eq!(state.metadata.nb, 3);
        assert!(state.metadata.done);
    }

    #[test]
    fn partial_batch_leaves_source_not_done() {
        let mut state = CampaignCheckpoint::default();
        state.record_batch(Path::new("a.csv"), &outcome(5, 4, true, vec![]));

        assert!(!state.data["a.csv"].done);
        assert!(!state.metadata.done);
    }

    #[test]
    fn failures_block_done_and_newer_errors_replace_same_row() {
        let mut state = CampaignCheckpoint::default();
        state.record_batch(
            Path::new("a.csv"),
            &outcome(
                3,
                2,
                true,
                vec![
                    RowError {
                        row: 1,
                        error: "first failure".to_string(),
                    },
                    RowError {
                        row: 2,
                        error: "other".to_string(),
                    },
                ],
            ),
        );

        state.record_batch(
            Path::new("a.csv"),
            &outcome(
                2,
                4,
                false,
                vec![RowError {
                    row: 1,
                    error: "second failure".to_string(),
                }],
            ),
        );

        let entry = &state.data["a.csv"];
        assert_eq!(entry.errors.len(), 2);
        assert_eq!(entry.errors[0].row, 1);
        assert_eq!(entry.errors[0].error, "second failure");
        assert_eq!(entry.errors[1].row, 2);
        assert!(!entry.done);
        assert_eq!(entry.last_index, 4);
        assert_eq!(state.metadata.nb, 5);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut state = CampaignCheckpoint::default();
        state.record_batch(Path::new("a.csv"), &outcome(5, 7, true, vec![]));
        state.record_batch(Path::new("a.csv"), &outcome(1, 3, false, vec![]));

        assert_eq!(state.data["a.csv"].last_index, 7);
    }

    #[test]
    fn campaign_done_needs_every_source_done() {
        let mut state = CampaignCheckpoint::default();
        state.record_batch(Path::new("a.csv"), &outcome(2, 1, false, vec![]));
        assert!(state.metadata.done);

        state.record_batch(Path::new("b.csv"), &outcome(2, 1, true, vec![]));
        assert!(!state.metadata.done);

        state.record_batch(Path::new("b.csv"), &outcome(1, 2, false, vec![]));
        assert!(state.metadata.done);
    }

    #[test]
    fn resume_point_distinguishes_fresh_sources() {
        let mut state = CampaignCheckpoint::default();
        assert_eq!(
            state.resume_point(Path::new("a.csv")),
            ResumePoint {
                done: false,
                last_index: None
            }
        );

        state.record_batch(Path::new("a.csv"), &outcome(1, 0, true, vec![]));
        assert_eq!(
            state.resume_point(Path::new("a.csv")),
            ResumePoint {
                done: false,
                last_index: Some(0)
            }
        );
    }
}
