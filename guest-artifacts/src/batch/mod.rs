mod outcome;

pub use outcome::{
    BatchOutcome, ChunkReport, FailedItem, ItemOutcome, SkippedItem, SucceededItem,
};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_batch_delay: Duration::ZERO,
        }
    }
}

/// Runs a worker over many items in sequential chunks.
///
/// Items within a chunk run concurrently. A failing or panicking item is
/// recorded and never stops the rest of the batch. Chunks after the first wait
/// `inter_batch_delay` before starting, which keeps bulk sends under provider
/// rate limits.
pub struct BatchProcessor {
    operation: &'static str,
    settings: BatchSettings,
}

impl BatchProcessor {
    pub fn new(operation: &'static str, settings: BatchSettings) -> Self {
        Self {
            operation,
            settings,
        }
    }

    pub fn settings(&self) -> BatchSettings {
        self.settings
    }

    pub async fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        worker: F,
        cancel: &CancellationToken,
    ) -> BatchOutcome<T, R>
    where
        T: Clone,
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<ItemOutcome<R>, PipelineError>>,
    {
        let batch_size = self.settings.batch_size.max(1);
        let delay = self.settings.inter_batch_delay;
        let total = items.len();
        let worker = &worker;

        let mut outcome = BatchOutcome::default();
        let mut pending = items.into_iter().enumerate().peekable();

        while pending.peek().is_some() {
            let chunk_index = outcome.chunks.len();
            if chunk_index > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                info!(
                    operation = self.operation,
                    remaining = pending.len(),
                    "batch cancelled, not starting further chunks"
                );
                break;
            }

            let chunk: Vec<(usize, T)> = pending.by_ref().take(batch_size).collect();
            outcome.chunks.push(ChunkReport {
                index: chunk_index,
                size: chunk.len(),
                started_at: Instant::now(),
            });
            debug!(
                operation = self.operation,
                chunk = chunk_index,
                size = chunk.len(),
                "starting chunk"
            );

            let running = chunk.into_iter().map(|(index, item)| async move {
                // Calling the worker sits inside the guard too, so a panic
                // before its future is built is caught like any other
                let task = item.clone();
                let result = AssertUnwindSafe(async move { worker(index, task).await })
                    .catch_unwind()
                    .await;
                (index, item, result)
            });

            for (index, item, result) in join_all(running).await {
                match result {
                    Ok(Ok(ItemOutcome::Done(result))) => {
                        outcome.succeeded.push(SucceededItem {
                            index,
                            item,
                            result,
                        });
                    }
                    Ok(Ok(ItemOutcome::Skipped(reason))) => {
                        debug!(operation = self.operation, index, %reason, "item skipped");
                        outcome.skipped.push(SkippedItem {
                            index,
                            item,
                            reason,
                        });
                    }
                    Ok(Err(e)) => {
                        warn!(operation = self.operation, index, error = %e, "item failed");
                        outcome.failed.push(FailedItem::new(index, item, &e));
                    }
                    Err(panic) => {
                        let e = PipelineError::WorkerPanicked(panic_message(panic.as_ref()));
                        warn!(operation = self.operation, index, error = %e, "item worker panicked");
                        outcome.failed.push(FailedItem::new(index, item, &e));
                    }
                }
            }
        }

        for (index, item) in pending {
            outcome
                .failed
                .push(FailedItem::new(index, item, &PipelineError::Cancelled));
        }

        self.record_metrics(&outcome);
        info!(
            operation = self.operation,
            total,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            chunks = outcome.chunks.len(),
            "batch finished"
        );
        outcome
    }

    fn record_metrics<T, R>(&self, outcome: &BatchOutcome<T, R>) {
        let op = self.operation;
        metrics::counter!("guest_artifacts_batch_items_total", "operation" => op, "outcome" => "succeeded")
            .increment(outcome.succeeded.len() as u64);
        metrics::counter!("guest_artifacts_batch_items_total", "operation" => op, "outcome" => "failed")
            .increment(outcome.failed.len() as u64);
        metrics::counter!("guest_artifacts_batch_items_total", "operation" => op, "outcome" => "skipped")
            .increment(outcome.skipped.len() as u64);
        metrics::counter!("guest_artifacts_batch_chunks_total", "operation" => op)
            .increment(outcome.chunks.len() as u64);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
