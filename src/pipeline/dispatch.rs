//! Campaign dispatch: drain the roster walker, send row by row, checkpoint
//! batch by batch.

use crate::checkpoint::{BatchOutcome, CheckpointStore, RowError};
use crate::models::{DeliveryReceipt, EmailMessage, MailshotError, MessageSpec, Result};
use crate::provider::Mailer;
use crate::roster::{RosterBatch, RosterWalker};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Totals for one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Rows handed to dispatch this run.
    pub rows: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Sends drafted messages for every unseen row, one checkpoint write per
/// settled batch.
pub struct Dispatcher {
    mailer: Arc<dyn Mailer>,
    spec: MessageSpec,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, spec: MessageSpec, concurrency: usize) -> Self {
        Self {
            mailer,
            spec,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Drain `walker`, checkpointing after every settled batch.
    ///
    /// A failed row never stops the batch; its error lands in the checkpoint
    /// and the cursor still moves past it. Sources with nothing unseen leave
    /// the checkpoint untouched.
    pub async fn run(
        &self,
        walker: &mut RosterWalker,
        store: &mut CheckpointStore,
    ) -> Result<DispatchStats> {
        let start = Instant::now();
        let mut stats = DispatchStats::default();

        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .unwrap()
                .progress_chars("##-"),
        );

        while let Some(batch) = walker.next_batch(|p| store.state().resume_point(p))? {
            if batch.rows.is_empty() {
                debug!(source = %batch.source.display(), "No unseen rows, checkpoint untouched");
                continue;
            }

            pb.inc_length(batch.rows.len() as u64);
            let outcome = self.dispatch_batch(&batch, &pb).await;

            stats.rows += outcome.rows;
            stats.failed += outcome.failures.len() as u64;
            stats.sent += outcome.rows - outcome.failures.len() as u64;

            store.record_batch(&batch.source, &outcome)?;
            pb.set_message(format!("sent: {}, failed: {}", stats.sent, stats.failed));
        }

        pb.finish_with_message(format!("sent: {}, failed: {}", stats.sent, stats.failed));
        info!(
            rows = stats.rows,
            sent = stats.sent,
            failed = stats.failed,
            runtime_secs = format!("{:.1}", start.elapsed().as_secs_f64()),
            "Dispatch finished"
        );

        Ok(stats)
    }

    /// Send every row of one batch concurrently and settle the outcome.
    ///
    /// The final row of a complete batch carries the last-contact flag; a
    /// partial batch never commits, later rows are still coming.
    async fn dispatch_batch(&self, batch: &RosterBatch, pb: &ProgressBar) -> BatchOutcome {
        let last = batch.rows.len() - 1;
        let mut handles = Vec::with_capacity(batch.rows.len());

        for (i, row) in batch.rows.iter().enumerate() {
            let mut message = self.spec.draft(&row.to);
            message.last_contact = !batch.is_partial && i == last;

            let mailer = Arc::clone(&self.mailer);
            let semaphore = Arc::clone(&self.semaphore);
            let pb = pb.clone();

            let handle = tokio::spawn(async move {
                let result = send_one(&*mailer, &semaphore, &message).await;
                pb.inc(1);
                result
            });
            handles.push((row.row_index, handle));
        }

        let mut failures = Vec::new();
        for (row_index, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(MailshotError::Internal(format!("send task panicked: {e}"))),
            };

            match result {
                Ok(receipt) => {
                    debug!(
                        row = row_index,
                        id = receipt.id.as_deref().unwrap_or("-"),
                        "Row sent"
                    );
                }
                Err(e) => {
                    warn!(
                        source = %batch.source.display(),
                        row = row_index,
                        error = %e,
                        "Send failed"
                    );
                    failures.push(RowError {
                        row: row_index,
                        error: e.to_string(),
                    });
                }
            }
        }

        BatchOutcome {
            rows: batch.rows.len() as u64,
            last_index: batch.rows[last].row_index,
            is_partial: batch.is_partial,
            failures,
        }
    }
}

/// Validate, then send. Validation failures never reach the network.
async fn send_one(
    mailer: &dyn Mailer,
    semaphore: &Semaphore,
    message: &EmailMessage,
) -> Result<DeliveryReceipt> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| MailshotError::Internal("Semaphore closed".to_string()))?;

    if let Some(errors) = mailer.check_message(message) {
        return Err(errors.into());
    }

    mailer.send(message).await
}
