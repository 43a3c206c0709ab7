mod email;
mod sender;
mod whatsapp;
mod worker;

pub use email::{EmailSender, EmailSettings};
pub use sender::{
    build_http_client, DeliveryReceipt, MessageSender, OutboundMessage, Senders,
    MAX_RESPONSE_BODY,
};
pub use whatsapp::{normalize_phone, WhatsAppSender, WhatsAppSettings};
pub use worker::{NotifiedGuest, NotifyWorker};

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchProcessor, BatchSettings, ItemOutcome};
use crate::error::PipelineError;
use crate::guests::DeliveryChannel;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub target_ids: Vec<String>,
    pub template_id: String,
    #[serde(default = "default_channel")]
    pub channel: DeliveryChannel,
}

fn default_channel() -> DeliveryChannel {
    DeliveryChannel::Email
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Sent,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub target_id: String,
    pub status: TargetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-target outcome of a bulk send, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<TargetResult>,
}

impl NotificationReport {
    /// Targets a send was attempted for, duplicates excluded
    pub fn processed(&self) -> usize {
        self.sent + self.failed
    }
}

/// Bulk delivery: one batch item per target, throttled between chunks
pub struct Notifier {
    processor: BatchProcessor,
    worker: Arc<NotifyWorker>,
}

impl Notifier {
    pub fn new(worker: Arc<NotifyWorker>, settings: BatchSettings) -> Self {
        Self {
            processor: BatchProcessor::new("notify", settings),
            worker,
        }
    }

    pub fn worker(&self) -> &Arc<NotifyWorker> {
        &self.worker
    }

    pub async fn notify(
        &self,
        event_id: &str,
        request: NotifyRequest,
        cancel: &CancellationToken,
    ) -> Result<NotificationReport, PipelineError> {
        if request.template_id.trim().is_empty() {
            return Err(PipelineError::InvalidArgument(
                "templateId is required".to_string(),
            ));
        }
        // An unconfigured channel fails every target, so refuse the call outright
        self.worker.senders().for_channel(request.channel)?;

        let channel = request.channel;
        let template_id = request.template_id.as_str();
        let mut seen = HashSet::new();
        let items: Vec<(String, bool)> = request
            .target_ids
            .into_iter()
            .map(|id| {
                let first = seen.insert(id.trim().to_ascii_lowercase());
                (id, first)
            })
            .collect();

        let outcome = self
            .processor
            .run(
                items,
                |_, (target_id, first)| async move {
                    if !first {
                        return Ok(ItemOutcome::Skipped("duplicate target".to_string()));
                    }
                    self.worker
                        .notify_one(event_id, &target_id, channel, template_id)
                        .await
                },
                cancel,
            )
            .await;

        let mut results: Vec<(usize, TargetResult)> = Vec::with_capacity(outcome.total());
        results.extend(outcome.succeeded.iter().map(|s| {
            (
                s.index,
                TargetResult {
                    target_id: s.item.0.clone(),
                    status: TargetStatus::Sent,
                    provider_message_id: s.result.provider_message_id.clone(),
                    reason: None,
                },
            )
        }));
        results.extend(outcome.failed.iter().map(|f| {
            (
                f.index,
                TargetResult {
                    target_id: f.item.0.clone(),
                    status: TargetStatus::Failed,
                    provider_message_id: None,
                    reason: Some(f.reason.clone()),
                },
            )
        }));
        results.extend(outcome.skipped.iter().map(|s| {
            (
                s.index,
                TargetResult {
                    target_id: s.item.0.clone(),
                    status: TargetStatus::Skipped,
                    provider_message_id: None,
                    reason: Some(s.reason.clone()),
                },
            )
        }));
        results.sort_by_key(|(index, _)| *index);

        Ok(NotificationReport {
            total: outcome.total(),
            sent: outcome.succeeded.len(),
            failed: outcome.failed.len(),
            skipped: outcome.skipped.len(),
            results: results.into_iter().map(|(_, r)| r).collect(),
        })
    }
}
