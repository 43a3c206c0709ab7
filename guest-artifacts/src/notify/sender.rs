use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::guests::DeliveryChannel;

/// Response bodies quoted in errors are cut to this many bytes
pub const MAX_RESPONSE_BODY: usize = 1024;

/// Everything a provider needs to deliver one guest's credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub guest_id: Uuid,
    pub event_id: String,
    pub recipient: String,
    pub recipient_name: String,
    pub table_no: String,
    pub others: String,
    pub template_id: String,
    pub attachment_name: String,
    pub png: Bytes,
    pub artifact_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel(&self) -> DeliveryChannel;

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, PipelineError>;
}

/// The senders configured for this deployment, by channel
#[derive(Clone, Default)]
pub struct Senders {
    email: Option<Arc<dyn MessageSender>>,
    whatsapp: Option<Arc<dyn MessageSender>>,
}

impl Senders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        match sender.channel() {
            DeliveryChannel::Email => self.email = Some(sender),
            DeliveryChannel::Whatsapp => self.whatsapp = Some(sender),
        }
        self
    }

    pub fn for_channel(
        &self,
        channel: DeliveryChannel,
    ) -> Result<Arc<dyn MessageSender>, PipelineError> {
        let sender = match channel {
            DeliveryChannel::Email => &self.email,
            DeliveryChannel::Whatsapp => &self.whatsapp,
        };
        sender.clone().ok_or_else(|| {
            PipelineError::InvalidArgument(format!("channel {channel} is not configured"))
        })
    }
}

pub fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client, PipelineError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("Guest Artifacts Notifier")
        .timeout(request_timeout)
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build http client: {e}")))
}

/// Pass 2xx responses through, turn anything else into a `TransientIo` that
/// quotes the status and the start of the body.
pub(crate) async fn check_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = first_n_bytes_of_response(response, MAX_RESPONSE_BODY).await;
    Err(PipelineError::TransientIo(format!(
        "{provider} returned {status}: {body}"
    )))
}

async fn first_n_bytes_of_response(response: reqwest::Response, n: usize) -> String {
    let mut body = response.bytes_stream();
    let mut buffer = Vec::with_capacity(n);

    while let Some(chunk) = body.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        buffer.extend_from_slice(&chunk);
        if buffer.len() >= n {
            buffer.truncate(n);
            break;
        }
    }

    String::from_utf8_lossy(&buffer).into_owned()
}
