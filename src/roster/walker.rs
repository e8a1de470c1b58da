//! Lazy batch walker over mailing-list sources.

use crate::checkpoint::ResumePoint;
use crate::models::Result;
use crate::roster::{load_rows, RecipientRow};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One batch of unseen rows from a single source.
#[derive(Debug, Clone)]
pub struct RosterBatch {
    pub source: PathBuf,
    pub rows: Vec<RecipientRow>,
    /// True when the global cap truncated this batch; later rows and sources
    /// are not visited this run.
    pub is_partial: bool,
}

/// Walks sources in order, yielding the unseen remainder of each source as
/// one batch, until sources or the global row budget run out.
///
/// Finite and lazy: a source's rows are read only when the walk reaches it,
/// and the walker is spent once it returns `None`.
pub struct RosterWalker {
    sources: std::vec::IntoIter<PathBuf>,
    budget: Option<u64>,
    spent: bool,
}

impl RosterWalker {
    /// `max` caps the total rows yielded across all sources; `None` means
    /// unbounded.
    pub fn new(sources: Vec<PathBuf>, max: Option<u64>) -> Self {
        Self {
            sources: sources.into_iter(),
            budget: max,
            spent: false,
        }
    }

    /// Next batch, or `None` once sources or budget are exhausted.
    ///
    /// `resume` is consulted once per source as the walk reaches it: a done
    /// source is skipped entirely, and rows at or below its last index are
    /// discarded before the batch is formed. A source with no unseen rows
    /// still yields its (empty) batch so the caller can observe it.
    pub fn next_batch(
        &mut self,
        resume: impl Fn(&Path) -> ResumePoint,
    ) -> Result<Option<RosterBatch>> {
        if self.spent || self.budget == Some(0) {
            self.spent = true;
            return Ok(None);
        }

        loop {
            let Some(source) = self.sources.next() else {
                self.spent = true;
                return Ok(None);
            };

            let point = resume(&source);
            if point.done {
                debug!(source = %source.display(), "Source already done, skipping");
                continue;
            }

            let rows = load_rows(&source)?;
            let total = rows.len();
            let mut remaining: Vec<RecipientRow> = match point.last_index {
                Some(last) => rows.into_iter().filter(|r| r.row_index > last).collect(),
                None => rows,
            };

            let mut is_partial = false;
            if let Some(budget) = self.budget {
                if remaining.len() as u64 >= budget {
                    // Cap reached: yield the fitting prefix and stop the walk.
                    remaining.truncate(budget as usize);
                    self.budget = Some(0);
                    self.spent = true;
                    is_partial = true;
                } else {
                    self.budget = Some(budget - remaining.len() as u64);
                }
            }

            debug!(
                source = %source.display(),
                rows = remaining.len(),
                skipped = total - remaining.len(),
                is_partial,
                "Yielding batch"
            );

            return Ok(Some(RosterBatch {
                source,
                rows: remaining,
                is_partial,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, recipients: &[&str]) -> PathBuf {
        let mut content = String::from("to,name\n");
        for (i, to) in recipients.iter().enumerate() {
            content.push_str(&format!("{to},Recipient {i}\n"));
        }
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn fresh(_: &Path) -> ResumePoint {
        ResumePoint {
            done: false,
            last_index: None,
        }
    }

    #[test]
    fn yields_one_batch_per_source_in_order() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com", "a1@x.com"]);
        let b = write_csv(&dir, "b.csv", &["b0@x.com"]);

        let mut walker = RosterWalker::new(vec![a.clone(), b.clone()], None);

        let batch = walker.next_batch(fresh).unwrap().unwrap();
        assert_eq!(batch.source, a);
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].row_index, 0);
        assert!(!batch.is_partial);

        let batch = walker.next_batch(fresh).unwrap().unwrap();
        assert_eq!(batch.source, b);
        assert_eq!(batch.rows.len(), 1);

        assert!(walker.next_batch(fresh).unwrap().is_none());
        assert!(walker.next_batch(fresh).unwrap().is_none());
    }

    #[test]
    fn skips_done_sources_without_reading_them() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com"]);
        let b = write_csv(&dir, "b.csv", &["b0@x.com"]);

        let mut points = HashMap::new();
        points.insert(
            a.clone(),
            ResumePoint {
                done: true,
                last_index: Some(0),
            },
        );

        let resume = |path: &Path| {
            points.get(path).copied().unwrap_or(ResumePoint {
                done: false,
                last_index: None,
            })
        };

        let mut walker = RosterWalker::new(vec![a, b.clone()], None);
        let batch = walker.next_batch(resume).unwrap().unwrap();
        assert_eq!(batch.source, b);
        assert!(walker.next_batch(resume).unwrap().is_none());
    }

    #[test]
    fn resumes_strictly_after_last_index() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com", "a1@x.com", "a2@x.com"]);

        let resume = |_: &Path| ResumePoint {
            done: false,
            last_index: Some(0),
        };

        let mut walker = RosterWalker::new(vec![a], None);
        let batch = walker.next_batch(resume).unwrap().unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].row_index, 1);
        assert_eq!(batch.rows[1].row_index, 2);
    }

    #[test]
    fn fresh_source_starts_at_row_zero() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com"]);

        let mut walker = RosterWalker::new(vec![a], None);
        let batch = walker.next_batch(fresh).unwrap().unwrap();
        assert_eq!(batch.rows[0].row_index, 0);
    }

    #[test]
    fn exhausted_but_not_done_source_yields_empty_batch() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com", "a1@x.com"]);

        let resume = |_: &Path| ResumePoint {
            done: false,
            last_index: Some(1),
        };

        let mut walker = RosterWalker::new(vec![a.clone()], None);
        let batch = walker.next_batch(resume).unwrap().unwrap();
        assert_eq!(batch.source, a);
        assert!(batch.rows.is_empty());
        assert!(!batch.is_partial);
    }

    #[test]
    fn cap_truncates_mid_source_and_stops_the_walk() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com", "a1@x.com", "a2@x.com"]);
        let b = write_csv(&dir, "b.csv", &["b0@x.com"]);

        let mut walker = RosterWalker::new(vec![a, b], Some(2));

        let batch = walker.next_batch(fresh).unwrap().unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert!(batch.is_partial);

        // b.csv is never visited this run
        assert!(walker.next_batch(fresh).unwrap().is_none());
    }

    #[test]
    fn cap_spans_sources() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com", "a1@x.com"]);
        let b = write_csv(&dir, "b.csv", &["b0@x.com", "b1@x.com", "b2@x.com"]);

        let mut walker = RosterWalker::new(vec![a, b], Some(4));

        let batch = walker.next_batch(fresh).unwrap().unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert!(!batch.is_partial);

        let batch = walker.next_batch(fresh).unwrap().unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert!(batch.is_partial);

        assert!(walker.next_batch(fresh).unwrap().is_none());
    }

    #[test]
    fn cap_equal_to_remainder_is_still_partial() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com", "a1@x.com"]);

        let mut walker = RosterWalker::new(vec![a], Some(2));
        let batch = walker.next_batch(fresh).unwrap().unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert!(batch.is_partial);
    }

    #[test]
    fn zero_cap_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let a = write_csv(&dir, "a.csv", &["a0@x.com"]);

        let mut walker = RosterWalker::new(vec![a], Some(0));
        assert!(walker.next_batch(fresh).unwrap().is_none());
    }
}
