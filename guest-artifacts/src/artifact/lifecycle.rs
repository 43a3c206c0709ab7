use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Where a guest's artifact is in its life:
///
/// `Unrequested -> Generating -> Stored -> ColorsChanged -> Stale -> Regenerating -> Stored`
///
/// A failed (re)generation falls back to the state it started from, so a
/// stale artifact stays servable until a regeneration actually lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Unrequested,
    Generating,
    Stored,
    ColorsChanged,
    Stale,
    Regenerating,
}

impl ArtifactState {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactState::Unrequested => "unrequested",
            ArtifactState::Generating => "generating",
            ArtifactState::Stored => "stored",
            ArtifactState::ColorsChanged => "colors_changed",
            ArtifactState::Stale => "stale",
            ArtifactState::Regenerating => "regenerating",
        }
    }

    /// Whether reads may be served from storage in this state
    pub fn is_servable(self) -> bool {
        matches!(
            self,
            ArtifactState::Stored
                | ArtifactState::ColorsChanged
                | ArtifactState::Stale
                | ArtifactState::Regenerating
        )
    }

    pub fn can_transition_to(self, next: ArtifactState) -> bool {
        use ArtifactState as S;
        matches!(
            (self, next),
            (S::Unrequested, S::Generating)
                | (S::Generating, S::Stored)
                | (S::Generating, S::Unrequested)
                | (S::Stored, S::ColorsChanged)
                | (S::ColorsChanged, S::Stale)
                | (S::Stale, S::ColorsChanged)
                | (S::Stale, S::Regenerating)
                | (S::Regenerating, S::Stored)
                | (S::Regenerating, S::Stale)
                // a fresh generation may be requested at any time
                | (S::Stored, S::Regenerating)
        )
    }

    pub fn transition(self, next: ArtifactState) -> Result<ArtifactState, PipelineError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::InvalidArgument(format!(
                "artifact cannot move from {self} to {next}"
            )))
        }
    }

    /// The state a generation attempt starts in, given the current state
    pub fn generation_state(self) -> ArtifactState {
        match self {
            ArtifactState::Unrequested | ArtifactState::Generating => ArtifactState::Generating,
            _ => ArtifactState::Regenerating,
        }
    }

    /// Where a failed generation attempt returns to
    pub fn rollback_state(self) -> ArtifactState {
        match self {
            ArtifactState::Generating => ArtifactState::Unrequested,
            ArtifactState::Regenerating => ArtifactState::Stale,
            other => other,
        }
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unrequested" => Ok(ArtifactState::Unrequested),
            "generating" => Ok(ArtifactState::Generating),
            "stored" => Ok(ArtifactState::Stored),
            "colors_changed" => Ok(ArtifactState::ColorsChanged),
            "stale" => Ok(ArtifactState::Stale),
            "regenerating" => Ok(ArtifactState::Regenerating),
            other => Err(PipelineError::InvalidArgument(format!(
                "unknown artifact state '{other}'"
            ))),
        }
    }
}

/// What a color change does to an already stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecolorPolicy {
    /// Regenerate immediately under the same key
    Regenerate,
    /// Only record the new colors; the artifact stays stale until regenerated
    RecordOnly,
}

impl FromStr for RecolorPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regenerate" => Ok(RecolorPolicy::Regenerate),
            "record_only" => Ok(RecolorPolicy::RecordOnly),
            other => Err(PipelineError::Config(format!(
                "unknown recolor policy '{other}'"
            ))),
        }
    }
}
