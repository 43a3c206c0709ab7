use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sender::{check_response, DeliveryReceipt, MessageSender, OutboundMessage};
use crate::error::PipelineError;
use crate::guests::DeliveryChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatsAppSettings {
    pub api_url: String,
    pub phone_number_id: String,
    pub access_token: String,
    pub language_code: String,
}

#[derive(Serialize)]
struct TemplateMessage<'a> {
    messaging_product: &'static str,
    to: String,
    #[serde(rename = "type")]
    kind: &'static str,
    template: Template<'a>,
}

#[derive(Serialize)]
struct Template<'a> {
    name: &'a str,
    language: Language<'a>,
    components: Vec<Component<'a>>,
}

#[derive(Serialize)]
struct Language<'a> {
    code: &'a str,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Component<'a> {
    Header { parameters: Vec<Parameter<'a>> },
    Body { parameters: Vec<Parameter<'a>> },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Parameter<'a> {
    Image { image: Link<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct Link<'a> {
    link: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

/// Digits only, as the messaging API expects
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    (digits.len() >= 7).then_some(digits)
}

/// Sends a pre-approved template whose header image links to the credential
pub struct WhatsAppSender {
    client: reqwest::Client,
    settings: WhatsAppSettings,
}

impl WhatsAppSender {
    pub fn new(client: reqwest::Client, settings: WhatsAppSettings) -> Self {
        Self { client, settings }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.phone_number_id
        )
    }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Whatsapp
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, PipelineError> {
        if !message.artifact_url.starts_with("http") {
            return Err(PipelineError::Config(
                "template images need a public artifact URL".to_string(),
            ));
        }
        let to = normalize_phone(&message.recipient).ok_or_else(|| {
            PipelineError::InvalidArgument(format!(
                "'{}' is not a usable phone number",
                message.recipient
            ))
        })?;

        let request = TemplateMessage {
            messaging_product: "whatsapp",
            to,
            kind: "template",
            template: Template {
                name: &message.template_id,
                language: Language {
                    code: &self.settings.language_code,
                },
                components: vec![
                    Component::Header {
                        parameters: vec![Parameter::Image {
                            image: Link {
                                link: &message.artifact_url,
                            },
                        }],
                    },
                    Component::Body {
                        parameters: vec![Parameter::Text {
                            text: &message.recipient_name,
                        }],
                    },
                ],
            },
        };

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.settings.access_token)
            .json(&request)
            .send()
            .await?;
        let response = check_response("whatsapp provider", response).await?;

        let id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|body| body.messages.into_iter().next())
            .map(|m| m.id);
        debug!(guest_id = %message.guest_id, provider_message_id = ?id, "template message accepted");

        Ok(DeliveryReceipt {
            provider_message_id: id,
        })
    }
}
