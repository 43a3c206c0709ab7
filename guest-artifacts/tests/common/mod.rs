#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use bytes::Bytes;
use common_s3::MockS3Client;
use parking_lot::Mutex;
use tower::ServiceExt;

use guest_artifacts::api::create_router;
use guest_artifacts::archive::ArchiveItem;
use guest_artifacts::artifact::ArtifactReference;
use guest_artifacts::batch::BatchSettings;
use guest_artifacts::context::{AppContext, PipelineSettings};
use guest_artifacts::error::PipelineError;
use guest_artifacts::guests::{DeliveryChannel, Guest, MemoryGuestStore, NewGuest};
use guest_artifacts::notify::{DeliveryReceipt, MessageSender, OutboundMessage, Senders};

pub const BUCKET: &str = "guest-artifacts";
pub const EVENT_ID: &str = "evt-1";

/// Sender that keeps every message it is asked to deliver
pub struct RecordingSender {
    channel: DeliveryChannel,
    fail_for: Option<String>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSender {
    pub fn new(channel: DeliveryChannel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail_for: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Rejects messages addressed to `recipient`
    pub fn failing_for(channel: DeliveryChannel, recipient: &str) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail_for: Some(recipient.to_string()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    fn channel(&self) -> DeliveryChannel {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, PipelineError> {
        if self.fail_for.as_deref() == Some(message.recipient.as_str()) {
            return Err(PipelineError::TransientIo(
                "provider returned 503 Service Unavailable".to_string(),
            ));
        }
        let mut sent = self.sent.lock();
        sent.push(message.clone());
        Ok(DeliveryReceipt {
            provider_message_id: Some(format!("msg-{}", sent.len())),
        })
    }
}

pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        bucket: BUCKET.to_string(),
        notify_batch: BatchSettings {
            batch_size: 10,
            inter_batch_delay: Duration::ZERO,
        },
        ..Default::default()
    }
}

pub fn new_guest(name: &str, table_no: &str, email: Option<&str>) -> Guest {
    NewGuest {
        event_id: EVENT_ID.to_string(),
        name: name.to_string(),
        table_no: table_no.to_string(),
        others: "0".to_string(),
        email: email.map(str::to_string),
        phone: None,
        colors: Default::default(),
    }
    .into_guest()
}

pub struct TestHarness {
    pub s3: MockS3Client,
    pub guests: Arc<MemoryGuestStore>,
    pub email: Arc<RecordingSender>,
    pub ctx: Arc<AppContext>,
    app: Router,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// Generate and store the guest's artifact, returning the updated record.
    /// Guests the store has not seen yet are added first.
    pub async fn generate(&self, guest: &Guest) -> (Guest, ArtifactReference) {
        if self.guests.guest(guest.id).is_none() {
            self.guests.insert(guest.clone());
        }
        let mut guest = guest.clone();
        let reference = self
            .ctx
            .artifacts
            .generate_and_store(&mut guest)
            .await
            .unwrap();
        (guest, reference)
    }

    pub fn archive_item(&self, guest: &Guest) -> ArchiveItem {
        let keys = self.ctx.artifacts.keys_for(guest);
        ArchiveItem {
            key: keys.vector,
            fallback_key: keys.raster,
            guest_id: guest.id.to_string(),
            display_name: guest.name.clone(),
            table_no: guest.table_no.clone(),
            others: guest.others.clone(),
        }
    }

    pub fn stored_keys(&self) -> Vec<String> {
        self.s3.keys(BUCKET)
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send_json("POST", uri, body).await
    }

    pub async fn put(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send_json("PUT", uri, body).await
    }

    pub async fn post_bytes(&self, uri: &str, content_type: &str, body: &[u8]) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
    }

    async fn send_json(&self, method: &str, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
    }

    pub async fn body_bytes(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    pub async fn body_json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
        let body = Self::body_bytes(response).await;
        serde_json::from_slice(&body).unwrap()
    }
}

#[derive(Default)]
pub struct TestHarnessBuilder {
    guests: Vec<Guest>,
    settings: Option<PipelineSettings>,
    s3: Option<MockS3Client>,
    email: Option<Arc<RecordingSender>>,
    no_senders: bool,
}

impl TestHarnessBuilder {
    pub fn with_guests(mut self, guests: Vec<Guest>) -> Self {
        self.guests = guests;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_s3(mut self, s3: MockS3Client) -> Self {
        self.s3 = Some(s3);
        self
    }

    pub fn with_email(mut self, sender: Arc<RecordingSender>) -> Self {
        self.email = Some(sender);
        self
    }

    pub fn without_senders(mut self) -> Self {
        self.no_senders = true;
        self
    }

    pub fn build(self) -> TestHarness {
        let s3 = self.s3.unwrap_or_default();
        let guests = Arc::new(MemoryGuestStore::with_guests(self.guests));
        let email = self
            .email
            .unwrap_or_else(|| RecordingSender::new(DeliveryChannel::Email));

        let senders = if self.no_senders {
            Senders::new()
        } else {
            Senders::new().with_sender(email.clone())
        };

        let ctx = Arc::new(
            AppContext::new(
                Arc::new(s3.clone()),
                guests.clone(),
                senders,
                self.settings.unwrap_or_else(test_settings),
            )
            .unwrap(),
        );
        let app = create_router(ctx.clone());

        TestHarness {
            s3,
            guests,
            email,
            ctx,
            app,
        }
    }
}
