use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sender::{check_response, DeliveryReceipt, MessageSender, OutboundMessage};
use crate::artifact::raster::PNG_MEDIA_TYPE;
use crate::error::PipelineError;
use crate::guests::DeliveryChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub api_url: String,
    pub api_key: String,
    pub from_address: String,
    pub subject: String,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    template_id: &'a str,
    variables: EmailVariables<'a>,
    attachments: [EmailAttachment<'a>; 1],
}

#[derive(Serialize)]
struct EmailVariables<'a> {
    name: &'a str,
    table_no: &'a str,
    others: &'a str,
    event_id: &'a str,
    artifact_url: &'a str,
}

#[derive(Serialize)]
struct EmailAttachment<'a> {
    filename: &'a str,
    content_type: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct EmailResponse {
    id: Option<String>,
}

/// Sends the credential as a PNG attachment through a transactional mail API
pub struct EmailSender {
    client: reqwest::Client,
    settings: EmailSettings,
}

impl EmailSender {
    pub fn new(client: reqwest::Client, settings: EmailSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl MessageSender for EmailSender {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Email
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, PipelineError> {
        let request = EmailRequest {
            from: &self.settings.from_address,
            to: [&message.recipient],
            subject: &self.settings.subject,
            template_id: &message.template_id,
            variables: EmailVariables {
                name: &message.recipient_name,
                table_no: &message.table_no,
                others: &message.others,
                event_id: &message.event_id,
                artifact_url: &message.artifact_url,
            },
            attachments: [EmailAttachment {
                filename: &message.attachment_name,
                content_type: PNG_MEDIA_TYPE,
                content: STANDARD.encode(&message.png),
            }],
        };

        let response = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_response("email provider", response).await?;

        // Providers that answer 202 with no body are fine too
        let id = response
            .json::<EmailResponse>()
            .await
            .ok()
            .and_then(|body| body.id);
        debug!(guest_id = %message.guest_id, provider_message_id = ?id, "email accepted");

        Ok(DeliveryReceipt {
            provider_message_id: id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use httpmock::prelude::*;
    use std::time::Duration;
    use uuid::Uuid;

    use crate::notify::sender::build_http_client;

    fn message() -> OutboundMessage {
        OutboundMessage {
            guest_id: Uuid::nil(),
            event_id: "evt".to_string(),
            recipient: "ada@example.com".to_string(),
            recipient_name: "Ada".to_string(),
            table_no: "3".to_string(),
            others: "1".to_string(),
            template_id: "welcome".to_string(),
            attachment_name: "Ada_3_1_x.png".to_string(),
            png: Bytes::from_static(b"png"),
            artifact_url: "https://cdn.example.com/qr_png/evt/Ada_3_1_x.png".to_string(),
        }
    }

    fn sender(server: &MockServer) -> EmailSender {
        EmailSender::new(
            build_http_client(Duration::from_secs(5)).unwrap(),
            EmailSettings {
                api_url: server.url("/emails"),
                api_key: "secret".to_string(),
                from_address: "events@example.com".to_string(),
                subject: "Your invitation".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_posts_attachment_and_reads_message_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/emails")
                .header("authorization", "Bearer secret")
                .json_body_partial(
                    r#"{"to":["ada@example.com"],"template_id":"welcome","attachments":[{"filename":"Ada_3_1_x.png","content_type":"image/png","content":"cG5n"}]}"#,
                );
            then.status(200).json_body(serde_json::json!({"id": "msg-1"}));
        });

        let receipt = sender(&server).send(&message()).await.unwrap();

        mock.assert();
        assert_eq!(receipt.provider_message_id.as_deref(), Some("msg-1"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_transient_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/emails");
            then.status(503).body("provider overloaded");
        });

        let result = sender(&server).send(&message()).await;

        match result {
            Err(PipelineError::TransientIo(msg)) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("provider overloaded"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
