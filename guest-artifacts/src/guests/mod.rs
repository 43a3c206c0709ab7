mod memory;
mod model;
mod postgres;

pub use memory::MemoryGuestStore;
pub use model::{DeliveryAttempt, DeliveryChannel, DeliveryStatus, Guest, NewGuest};
pub use postgres::PgGuestStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::artifact::color::ArtifactColors;
use crate::artifact::lifecycle::ArtifactState;
use crate::error::PipelineError;

/// Guest records as the pipeline sees them. Lookups are always scoped to an
/// event so one event's request can never touch another event's guests.
#[async_trait]
pub trait GuestStore: Send + Sync {
    async fn create_guest(&self, guest: NewGuest) -> Result<Guest, PipelineError>;

    async fn get_guest(&self, event_id: &str, guest_id: Uuid) -> Result<Guest, PipelineError>;

    async fn update_colors(
        &self,
        guest_id: Uuid,
        colors: &ArtifactColors,
    ) -> Result<(), PipelineError>;

    async fn set_artifact_state(
        &self,
        guest_id: Uuid,
        state: ArtifactState,
    ) -> Result<(), PipelineError>;

    async fn delete_guest(&self, event_id: &str, guest_id: Uuid) -> Result<(), PipelineError>;

    async fn record_delivery(&self, attempt: &DeliveryAttempt) -> Result<(), PipelineError>;

    async fn health_check(&self) -> Result<(), PipelineError>;
}

pub(crate) fn guest_not_found(event_id: &str, guest_id: Uuid) -> PipelineError {
    PipelineError::not_found(format!("guest:{event_id}/{guest_id}"))
}
