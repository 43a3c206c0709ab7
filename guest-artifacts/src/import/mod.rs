mod parse;
mod worker;

pub use parse::{parse_records, ImportRecord, SheetFormat, CSV_MEDIA_TYPE, XLSX_MEDIA_TYPE};
pub use worker::{ImportNotification, ImportWorker, ImportedGuest};

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::batch::{BatchProcessor, BatchSettings};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Imported,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowReport {
    pub row: usize,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub notified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows: Vec<RowReport>,
}

impl ImportReport {
    /// Rows that went through the worker, skipped ones excluded
    pub fn processed(&self) -> usize {
        self.imported + self.failed
    }
}

/// Bulk import: parse the sheet, then one batch item per row
pub struct Importer {
    processor: BatchProcessor,
    worker: Arc<ImportWorker>,
}

impl Importer {
    pub fn new(worker: Arc<ImportWorker>, settings: BatchSettings) -> Self {
        Self {
            processor: BatchProcessor::new("import", settings),
            worker,
        }
    }

    pub async fn import(
        &self,
        event_id: &str,
        format: SheetFormat,
        bytes: &[u8],
        notification: Option<ImportNotification>,
        cancel: &CancellationToken,
    ) -> Result<ImportReport, PipelineError> {
        if event_id.trim().is_empty() {
            return Err(PipelineError::InvalidArgument(
                "event id is required".to_string(),
            ));
        }
        let records = parse_records(format, bytes)?;
        let notification = notification.as_ref();

        let outcome = self
            .processor
            .run(
                records,
                |_, record| self.worker.import_row(event_id, record, notification),
                cancel,
            )
            .await;

        let mut rows: Vec<RowReport> = Vec::with_capacity(outcome.total());
        rows.extend(outcome.succeeded.iter().map(|s| RowReport {
            row: s.item.row,
            status: RowStatus::Imported,
            guest_id: Some(s.result.guest_id),
            reason: s.result.notification_error.clone(),
            notified: s.result.notified,
        }));
        rows.extend(outcome.failed.iter().map(|f| RowReport {
            row: f.item.row,
            status: RowStatus::Failed,
            guest_id: None,
            reason: Some(f.reason.clone()),
            notified: false,
        }));
        rows.extend(outcome.skipped.iter().map(|s| RowReport {
            row: s.item.row,
            status: RowStatus::Skipped,
            guest_id: None,
            reason: Some(s.reason.clone()),
            notified: false,
        }));
        rows.sort_by_key(|r| r.row);

        let report = ImportReport {
            total: outcome.total(),
            imported: outcome.succeeded.len(),
            failed: outcome.failed.len(),
            skipped: outcome.skipped.len(),
            rows,
        };
        info!(
            event_id,
            total = report.total,
            imported = report.imported,
            failed = report.failed,
            skipped = report.skipped,
            "import finished"
        );
        Ok(report)
    }
}
