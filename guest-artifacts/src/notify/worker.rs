use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::sender::{DeliveryReceipt, OutboundMessage, Senders};
use crate::artifact::keys::file_stem;
use crate::artifact::service::ArtifactService;
use crate::batch::ItemOutcome;
use crate::error::PipelineError;
use crate::guests::{DeliveryAttempt, DeliveryChannel, DeliveryStatus, Guest, GuestStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifiedGuest {
    pub guest_id: Uuid,
    pub channel: DeliveryChannel,
    pub provider_message_id: Option<String>,
}

/// Delivers one guest's credential and records the attempt
pub struct NotifyWorker {
    guests: Arc<dyn GuestStore>,
    artifacts: Arc<ArtifactService>,
    senders: Senders,
}

impl NotifyWorker {
    pub fn new(
        guests: Arc<dyn GuestStore>,
        artifacts: Arc<ArtifactService>,
        senders: Senders,
    ) -> Self {
        Self {
            guests,
            artifacts,
            senders,
        }
    }

    pub fn senders(&self) -> &Senders {
        &self.senders
    }

    /// Look up a guest by id within the event and deliver to it
    pub async fn notify_one(
        &self,
        event_id: &str,
        target_id: &str,
        channel: DeliveryChannel,
        template_id: &str,
    ) -> Result<ItemOutcome<NotifiedGuest>, PipelineError> {
        let guest_id = Uuid::parse_str(target_id.trim()).map_err(|_| {
            PipelineError::InvalidArgument(format!("'{target_id}' is not a guest id"))
        })?;
        let mut guest = self.guests.get_guest(event_id, guest_id).await?;
        let receipt = self.deliver(&mut guest, channel, template_id).await?;
        Ok(ItemOutcome::Done(NotifiedGuest {
            guest_id,
            channel,
            provider_message_id: receipt.provider_message_id,
        }))
    }

    /// Resolve the guest's PNG, send it and record the attempt either way
    pub async fn deliver(
        &self,
        guest: &mut Guest,
        channel: DeliveryChannel,
        template_id: &str,
    ) -> Result<DeliveryReceipt, PipelineError> {
        let result = self.attempt(guest, channel, template_id).await;

        let attempt = DeliveryAttempt {
            guest_id: guest.id,
            channel,
            template_id: template_id.to_string(),
            status: match result {
                Ok(_) => DeliveryStatus::Sent,
                Err(_) => DeliveryStatus::Failed,
            },
            provider_message_id: result
                .as_ref()
                .ok()
                .and_then(|r| r.provider_message_id.clone()),
            detail: result.as_ref().err().map(PipelineError::to_string),
            attempted_at: Utc::now(),
        };
        if let Err(e) = self.guests.record_delivery(&attempt).await {
            warn!(guest_id = %guest.id, error = %e, "failed to record delivery attempt");
        }

        let status = attempt.status.as_str();
        metrics::counter!(
            "guest_artifacts_deliveries_total",
            "channel" => channel.as_str(),
            "status" => status
        )
        .increment(1);
        info!(guest_id = %guest.id, %channel, status, "delivery attempted");

        result
    }

    async fn attempt(
        &self,
        guest: &mut Guest,
        channel: DeliveryChannel,
        template_id: &str,
    ) -> Result<DeliveryReceipt, PipelineError> {
        let sender = self.senders.for_channel(channel)?;
        let recipient = recipient_for(guest, channel)?;
        let artifact = self.artifacts.resolve_for_delivery(guest).await?;

        let subject_id = guest.subject_id();
        let message = OutboundMessage {
            guest_id: guest.id,
            event_id: guest.event_id.clone(),
            recipient,
            recipient_name: guest.name.clone(),
            table_no: guest.table_no.clone(),
            others: guest.others.clone(),
            template_id: template_id.to_string(),
            attachment_name: format!("{}.png", file_stem(&guest.key_parts(&subject_id))),
            png: artifact.png,
            artifact_url: artifact.locator,
        };
        sender.send(&message).await
    }
}

fn recipient_for(guest: &Guest, channel: DeliveryChannel) -> Result<String, PipelineError> {
    let (address, what) = match channel {
        DeliveryChannel::Email => (&guest.email, "email address"),
        DeliveryChannel::Whatsapp => (&guest.phone, "phone number"),
    };
    address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::InvalidArgument(format!("guest has no {what}")))
}
