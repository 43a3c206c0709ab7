use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::artifact::color::ArtifactColors;
use crate::artifact::generator::generate_with;
use crate::artifact::keys::{ArtifactKeys, KeyScheme};
use crate::artifact::lifecycle::{ArtifactState, RecolorPolicy};
use crate::artifact::raster::RasterConverter;
use crate::artifact::store::{
    Artifact, ArtifactFormat, ArtifactLocation, ArtifactStore, ResolvedArtifact,
};
use crate::artifact::ArtifactReference;
use crate::error::PipelineError;
use crate::guests::{Guest, GuestStore};

/// A PNG ready to attach to or link from an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryArtifact {
    pub png: Bytes,
    pub raster_key: String,
    pub locator: String,
}

/// Owns the life of each guest's artifact: generation, recoloring, raster
/// caching and deletion. Keys are always re-derived from the guest record.
pub struct ArtifactService {
    store: ArtifactStore,
    keys: KeyScheme,
    converter: RasterConverter,
    guests: Arc<dyn GuestStore>,
    policy: RecolorPolicy,
}

impl ArtifactService {
    pub fn new(
        store: ArtifactStore,
        keys: KeyScheme,
        converter: RasterConverter,
        guests: Arc<dyn GuestStore>,
        policy: RecolorPolicy,
    ) -> Self {
        Self {
            store,
            keys,
            converter,
            guests,
            policy,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn converter(&self) -> RasterConverter {
        self.converter
    }

    pub fn policy(&self) -> RecolorPolicy {
        self.policy
    }

    pub fn keys_for(&self, guest: &Guest) -> ArtifactKeys {
        let subject_id = guest.subject_id();
        self.keys.keys_for(&guest.key_parts(&subject_id))
    }

    pub fn reference_for(&self, guest: &Guest, format: ArtifactFormat) -> ArtifactReference {
        let keys = self.keys_for(guest);
        let storage_key = keys.for_format(format).to_string();
        ArtifactReference {
            subject_id: guest.subject_id(),
            locator: self.store.locator(&storage_key),
            storage_key,
            format,
            colors: guest.colors,
            state: guest.artifact_state,
        }
    }

    async fn move_to(&self, guest: &mut Guest, next: ArtifactState) -> Result<(), PipelineError> {
        if guest.artifact_state == next {
            return Ok(());
        }
        let next = guest.artifact_state.transition(next)?;
        self.guests.set_artifact_state(guest.id, next).await?;
        guest.artifact_state = next;
        Ok(())
    }

    /// Render the guest's artifact from its current colors and store it,
    /// overwriting any previous version under the same key.
    pub async fn generate_and_store(
        &self,
        guest: &mut Guest,
    ) -> Result<ArtifactReference, PipelineError> {
        if guest.artifact_state == ArtifactState::ColorsChanged {
            self.move_to(guest, ArtifactState::Stale).await?;
        }
        let regenerating = guest.artifact_state.is_servable();
        let attempt_state = guest.artifact_state.generation_state();
        self.move_to(guest, attempt_state).await?;

        let written = self.render_and_write(guest).await;
        let vector = match written {
            Ok(vector) => vector,
            Err(e) => {
                let rollback = attempt_state.rollback_state();
                if let Err(state_err) = self.move_to(guest, rollback).await {
                    warn!(guest_id = %guest.id, error = %state_err, "failed to roll back artifact state");
                }
                metrics::counter!("guest_artifacts_generation_failures_total").increment(1);
                return Err(e);
            }
        };

        if regenerating {
            // A cached PNG of the old colors must not outlive the new vector
            let keys = self.keys_for(guest);
            if let Err(e) = self.cache_raster(&keys.raster, vector).await {
                warn!(guest_id = %guest.id, error = %e, "failed to refresh cached raster, dropping it");
                self.store.delete_best_effort(&[keys.raster.as_str()]).await;
            }
        }

        self.move_to(guest, ArtifactState::Stored).await?;
        metrics::counter!("guest_artifacts_generated_total").increment(1);
        Ok(self.reference_for(guest, ArtifactFormat::Vector))
    }

    async fn render_and_write(&self, guest: &Guest) -> Result<Bytes, PipelineError> {
        let subject_id = guest.subject_id();
        let svg = generate_with(&subject_id, &guest.colors)?;
        let keys = self.keys.keys_for(&guest.key_parts(&subject_id));
        self.store
            .write(&keys.vector, &Artifact::Vector(svg.clone()))
            .await?;
        debug!(guest_id = %guest.id, key = %keys.vector, "stored artifact");
        Ok(svg)
    }

    async fn cache_raster(&self, raster_key: &str, vector: Bytes) -> Result<Bytes, PipelineError> {
        let png = self.converter.convert(vector).await?;
        self.store
            .write(raster_key, &Artifact::Raster(png.clone()))
            .await?;
        Ok(png)
    }

    /// Read an artifact in the preferred format, falling back to the other one
    pub async fn resolve(
        &self,
        guest: &Guest,
        preferred: ArtifactFormat,
    ) -> Result<ResolvedArtifact, PipelineError> {
        let keys = self.keys_for(guest);
        let vector = ArtifactLocation::new(keys.vector, ArtifactFormat::Vector);
        let raster = ArtifactLocation::new(keys.raster, ArtifactFormat::Raster);
        match preferred {
            ArtifactFormat::Vector => self.store.resolve_readable(&vector, &raster).await,
            ArtifactFormat::Raster => self.store.resolve_readable(&raster, &vector).await,
        }
    }

    /// A PNG for messaging: the cached raster if present, otherwise converted
    /// from the vector (generating that first if needed) and cached.
    pub async fn resolve_for_delivery(
        &self,
        guest: &mut Guest,
    ) -> Result<DeliveryArtifact, PipelineError> {
        let keys = self.keys_for(guest);

        match self.store.read(&keys.raster).await {
            Ok(png) => {
                return Ok(DeliveryArtifact {
                    png,
                    locator: self.store.locator(&keys.raster),
                    raster_key: keys.raster,
                })
            }
            Err(PipelineError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let vector = match self.store.read(&keys.vector).await {
            Ok(vector) => vector,
            Err(PipelineError::NotFound { .. }) => {
                info!(guest_id = %guest.id, "no stored artifact, generating before delivery");
                self.generate_and_store(guest).await?;
                self.store.read(&keys.vector).await?
            }
            Err(e) => return Err(e),
        };

        let png = self.converter.convert(vector).await?;
        if let Err(e) = self
            .store
            .write(&keys.raster, &Artifact::Raster(png.clone()))
            .await
        {
            warn!(guest_id = %guest.id, error = %e, "failed to cache converted raster");
        }

        Ok(DeliveryArtifact {
            png,
            locator: self.store.locator(&keys.raster),
            raster_key: keys.raster,
        })
    }

    /// Record new colors and apply the configured recolor policy
    pub async fn recolor(
        &self,
        guest: &mut Guest,
        colors: ArtifactColors,
    ) -> Result<ArtifactReference, PipelineError> {
        if guest.colors == colors {
            return Ok(self.reference_for(guest, ArtifactFormat::Vector));
        }

        self.guests.update_colors(guest.id, &colors).await?;
        guest.colors = colors;

        if guest.artifact_state.is_servable() {
            self.move_to(guest, ArtifactState::ColorsChanged).await?;
            self.move_to(guest, ArtifactState::Stale).await?;
        }

        match self.policy {
            RecolorPolicy::Regenerate => self.generate_and_store(guest).await,
            RecolorPolicy::RecordOnly => {
                debug!(guest_id = %guest.id, "colors recorded, artifact left stale");
                Ok(self.reference_for(guest, ArtifactFormat::Vector))
            }
        }
    }

    /// Remove both stored formats, never failing the caller
    pub async fn delete_artifacts(&self, guest: &Guest) {
        let keys = self.keys_for(guest);
        self.store
            .delete_best_effort(&[keys.vector.as_str(), keys.raster.as_str()])
            .await;
    }
}
