use std::time::Instant;

use serde::Serialize;

use crate::error::PipelineError;

/// What a worker reports for one item it handled without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome<R> {
    Done(R),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SucceededItem<T, R> {
    pub index: usize,
    pub item: T,
    pub result: R,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem<T> {
    pub index: usize,
    pub item: T,
    pub kind: &'static str,
    pub reason: String,
}

impl<T> FailedItem<T> {
    pub fn new(index: usize, item: T, error: &PipelineError) -> Self {
        Self {
            index,
            item,
            kind: error.kind(),
            reason: error.reason(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem<T> {
    pub index: usize,
    pub item: T,
    pub reason: String,
}

/// One chunk as it was launched
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub index: usize,
    pub size: usize,
    #[serde(skip)]
    pub started_at: Instant,
}

/// Every input item lands in exactly one of `succeeded`, `failed` or `skipped`,
/// each list ordered by input index.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome<T, R> {
    pub succeeded: Vec<SucceededItem<T, R>>,
    pub failed: Vec<FailedItem<T>>,
    pub skipped: Vec<SkippedItem<T>>,
    pub chunks: Vec<ChunkReport>,
}

impl<T, R> Default for BatchOutcome<T, R> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            chunks: Vec::new(),
        }
    }
}

impl<T, R> BatchOutcome<T, R> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    /// Items never started because the batch was cancelled
    pub fn cancelled(&self) -> usize {
        self.failed
            .iter()
            .filter(|f| f.kind == PipelineError::Cancelled.kind())
            .count()
    }
}
