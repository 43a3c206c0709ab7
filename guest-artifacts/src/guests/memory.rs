use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{guest_not_found, DeliveryAttempt, Guest, GuestStore, NewGuest};
use crate::artifact::color::ArtifactColors;
use crate::artifact::lifecycle::ArtifactState;
use crate::error::PipelineError;

/// In-process guest store, used by tests and local runs without Postgres
#[derive(Default)]
pub struct MemoryGuestStore {
    guests: Mutex<HashMap<Uuid, Guest>>,
    deliveries: Mutex<Vec<DeliveryAttempt>>,
}

impl MemoryGuestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guests(guests: impl IntoIterator<Item = Guest>) -> Self {
        let store = Self::new();
        store
            .guests
            .lock()
            .extend(guests.into_iter().map(|g| (g.id, g)));
        store
    }

    /// Seed a guest as-is, keeping its id
    pub fn insert(&self, guest: Guest) {
        self.guests.lock().insert(guest.id, guest);
    }

    pub fn guest(&self, guest_id: Uuid) -> Option<Guest> {
        self.guests.lock().get(&guest_id).cloned()
    }

    pub fn guests_for_event(&self, event_id: &str) -> Vec<Guest> {
        let mut guests: Vec<Guest> = self
            .guests
            .lock()
            .values()
            .filter(|g| g.event_id == event_id)
            .cloned()
            .collect();
        guests.sort_by_key(|g| g.id);
        guests
    }

    pub fn deliveries(&self) -> Vec<DeliveryAttempt> {
        self.deliveries.lock().clone()
    }

    fn with_guest<T>(
        &self,
        guest_id: Uuid,
        f: impl FnOnce(&mut Guest) -> T,
    ) -> Result<T, PipelineError> {
        let mut guests = self.guests.lock();
        let guest = guests
            .get_mut(&guest_id)
            .ok_or_else(|| PipelineError::not_found(format!("guest:{guest_id}")))?;
        Ok(f(guest))
    }
}

#[async_trait]
impl GuestStore for MemoryGuestStore {
    async fn create_guest(&self, guest: NewGuest) -> Result<Guest, PipelineError> {
        let guest = guest.into_guest();
        self.guests.lock().insert(guest.id, guest.clone());
        Ok(guest)
    }

    async fn get_guest(&self, event_id: &str, guest_id: Uuid) -> Result<Guest, PipelineError> {
        self.guests
            .lock()
            .get(&guest_id)
            .filter(|g| g.event_id == event_id)
            .cloned()
            .ok_or_else(|| guest_not_found(event_id, guest_id))
    }

    async fn update_colors(
        &self,
        guest_id: Uuid,
        colors: &ArtifactColors,
    ) -> Result<(), PipelineError> {
        self.with_guest(guest_id, |g| g.colors = *colors)
    }

    async fn set_artifact_state(
        &self,
        guest_id: Uuid,
        state: ArtifactState,
    ) -> Result<(), PipelineError> {
        self.with_guest(guest_id, |g| g.artifact_state = state)
    }

    async fn delete_guest(&self, event_id: &str, guest_id: Uuid) -> Result<(), PipelineError> {
        let mut guests = self.guests.lock();
        match guests.get(&guest_id) {
            Some(g) if g.event_id == event_id => {
                guests.remove(&guest_id);
                Ok(())
            }
            _ => Err(guest_not_found(event_id, guest_id)),
        }
    }

    async fn record_delivery(&self, attempt: &DeliveryAttempt) -> Result<(), PipelineError> {
        self.deliveries.lock().push(attempt.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}
