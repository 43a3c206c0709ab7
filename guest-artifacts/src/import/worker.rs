use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::parse::ImportRecord;
use crate::artifact::color::ArtifactColors;
use crate::artifact::service::ArtifactService;
use crate::batch::ItemOutcome;
use crate::error::PipelineError;
use crate::guests::{DeliveryChannel, GuestStore, NewGuest};
use crate::notify::NotifyWorker;

/// Send each imported guest their credential right away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportNotification {
    pub channel: DeliveryChannel,
    pub template_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedGuest {
    pub guest_id: Uuid,
    pub storage_key: String,
    pub locator: String,
    pub notified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

/// Turns one parsed row into a stored guest with a generated artifact
pub struct ImportWorker {
    guests: Arc<dyn GuestStore>,
    artifacts: Arc<ArtifactService>,
    notifier: Arc<NotifyWorker>,
    default_colors: ArtifactColors,
}

impl ImportWorker {
    pub fn new(
        guests: Arc<dyn GuestStore>,
        artifacts: Arc<ArtifactService>,
        notifier: Arc<NotifyWorker>,
        default_colors: ArtifactColors,
    ) -> Self {
        Self {
            guests,
            artifacts,
            notifier,
            default_colors,
        }
    }

    pub async fn import_row(
        &self,
        event_id: &str,
        record: ImportRecord,
        notification: Option<&ImportNotification>,
    ) -> Result<ItemOutcome<ImportedGuest>, PipelineError> {
        if record.is_blank() {
            return Ok(ItemOutcome::Skipped("blank row".to_string()));
        }
        let Some(name) = record.name else {
            return Ok(ItemOutcome::Skipped("missing name".to_string()));
        };

        let mut guest = self
            .guests
            .create_guest(NewGuest {
                event_id: event_id.to_string(),
                name,
                table_no: record.table_no.unwrap_or_else(|| "0".to_string()),
                others: record.others.unwrap_or_else(|| "0".to_string()),
                email: record.email,
                phone: record.phone,
                colors: self.default_colors,
            })
            .await?;
        debug!(guest_id = %guest.id, row = record.row, "guest created from import");

        let reference = self.artifacts.generate_and_store(&mut guest).await?;

        let mut imported = ImportedGuest {
            guest_id: guest.id,
            storage_key: reference.storage_key,
            locator: reference.locator,
            notified: false,
            notification_error: None,
        };

        // The guest and artifact exist now, so a failed send does not fail the row
        if let Some(notification) = notification {
            match self
                .notifier
                .deliver(&mut guest, notification.channel, &notification.template_id)
                .await
            {
                Ok(_) => imported.notified = true,
                Err(e) => {
                    warn!(guest_id = %guest.id, error = %e, "imported guest could not be notified");
                    imported.notification_error = Some(e.to_string());
                }
            }
        }

        Ok(ItemOutcome::Done(imported))
    }
}
