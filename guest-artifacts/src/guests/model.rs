use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::color::ArtifactColors;
use crate::artifact::keys::KeyParts;
use crate::artifact::lifecycle::ArtifactState;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    /// Also the subject identifier encoded in the guest's artifact
    pub id: Uuid,
    pub event_id: String,
    pub name: String,
    pub table_no: String,
    pub others: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub colors: ArtifactColors,
    pub artifact_state: ArtifactState,
    pub created_at: DateTime<Utc>,
}

impl Guest {
    pub fn subject_id(&self) -> String {
        self.id.to_string()
    }

    pub fn key_parts<'a>(&'a self, subject_id: &'a str) -> KeyParts<'a> {
        KeyParts {
            event_id: &self.event_id,
            display_name: &self.name,
            table_no: &self.table_no,
            others: &self.others,
            subject_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGuest {
    pub event_id: String,
    pub name: String,
    pub table_no: String,
    pub others: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub colors: ArtifactColors,
}

impl NewGuest {
    pub fn into_guest(self) -> Guest {
        Guest {
            id: Uuid::now_v7(),
            event_id: self.event_id,
            name: self.name,
            table_no: self.table_no,
            others: self.others,
            email: self.email,
            phone: self.phone,
            colors: self.colors,
            artifact_state: ArtifactState::Unrequested,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Email,
    Whatsapp,
}

impl DeliveryChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Whatsapp => "whatsapp",
        }
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryChannel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(DeliveryChannel::Email),
            "whatsapp" => Ok(DeliveryChannel::Whatsapp),
            other => Err(PipelineError::InvalidArgument(format!(
                "unknown delivery channel '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// One attempt to deliver a guest's artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub guest_id: Uuid,
    pub channel: DeliveryChannel,
    pub template_id: String,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub detail: Option<String>,
    pub attempted_at: DateTime<Utc>,
}
