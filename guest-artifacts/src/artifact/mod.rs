pub mod color;
pub mod generator;
pub mod keys;
pub mod lifecycle;
pub mod raster;
pub mod service;
pub mod store;

use serde::Serialize;

pub use color::{ArtifactColors, Color};
pub use lifecycle::{ArtifactState, RecolorPolicy};
pub use service::{ArtifactService, DeliveryArtifact};
pub use store::{Artifact, ArtifactFormat, ArtifactLocation, ArtifactStore, ResolvedArtifact};

/// A guest's handle on its stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReference {
    pub subject_id: String,
    pub storage_key: String,
    pub format: ArtifactFormat,
    pub colors: ArtifactColors,
    pub locator: String,
    pub state: ArtifactState,
}
