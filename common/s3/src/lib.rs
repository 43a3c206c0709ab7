//! Object storage client abstraction for the guest artifact services
//!
//! This crate provides a thin wrapper around the AWS S3 operations the artifact
//! pipeline needs (single-object reads/writes/deletes plus a streaming upload of
//! unknown length), so callers can be tested against the in-memory mock.
//!
//! Trait-based design with a manual mock implementation that's always available
//! for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as AwsS3SdkClient;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

/// S3 rejects multipart parts smaller than this, except for the last one.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum S3Error {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("S3 operation failed: {0}")]
    OperationFailed(String),
}

impl From<aws_sdk_s3::Error> for S3Error {
    fn from(err: aws_sdk_s3::Error) -> Self {
        S3Error::OperationFailed(err.to_string())
    }
}

/// A body of unknown length. An `Err` item aborts the upload it feeds.
pub type ByteChunkStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// S3 client trait that both real and mock implementations use
#[async_trait]
pub trait S3Client: Send + Sync {
    /// Get an object's full body
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, S3Error>;

    /// Create or overwrite an object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), S3Error>;

    /// Delete an object, returning `NotFound` if there was nothing to delete
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error>;

    /// Upload a body that is still being produced.
    ///
    /// Nothing is created in the bucket until the first byte arrives. Returns
    /// `Ok(None)` when the stream ends without yielding any bytes, otherwise the
    /// number of bytes written.
    async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        body: ByteChunkStream,
    ) -> Result<Option<u64>, S3Error>;
}

/// Real S3 client implementation
pub struct S3Impl {
    client: AwsS3SdkClient,
}

impl S3Impl {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }

    async fn start_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<String, S3Error> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| S3Error::OperationFailed(format!("Failed to start upload: {e}")))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| S3Error::OperationFailed("S3 returned no upload id".to_string()))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, S3Error> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                S3Error::OperationFailed(format!("Failed to upload part {part_number}: {e}"))
            })?;

        Ok(CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_string))
            .part_number(part_number)
            .build())
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!("Failed to abort multipart upload {upload_id} for s3://{bucket}/{key}: {e}");
        }
    }

    async fn drive_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        mut body: ByteChunkStream,
        upload_id: &mut Option<String>,
    ) -> Result<Option<u64>, S3Error> {
        let mut buffer = BytesMut::new();
        let mut parts = Vec::new();
        let mut total: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                S3Error::OperationFailed(format!("Upload body failed before completion: {e}"))
            })?;
            total += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);

            if buffer.len() >= MIN_PART_SIZE {
                let id = match upload_id {
                    Some(id) => id.clone(),
                    None => {
                        let id = self.start_multipart(bucket, key, content_type).await?;
                        *upload_id = Some(id.clone());
                        id
                    }
                };
                let part_number = i32::try_from(parts.len() + 1)
                    .map_err(|_| S3Error::OperationFailed("Too many parts".to_string()))?;
                let part = self
                    .upload_part(bucket, key, &id, part_number, buffer.split().freeze())
                    .await?;
                parts.push(part);
            }
        }

        let Some(id) = upload_id.clone() else {
            // Small bodies never needed a multipart upload
            if buffer.is_empty() {
                return Ok(None);
            }
            self.put_object(bucket, key, buffer.freeze(), content_type)
                .await?;
            return Ok(Some(total));
        };

        if !buffer.is_empty() {
            let part_number = i32::try_from(parts.len() + 1)
                .map_err(|_| S3Error::OperationFailed("Too many parts".to_string()))?;
            let part = self
                .upload_part(bucket, key, &id, part_number, buffer.freeze())
                .await?;
            parts.push(part);
        }

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| S3Error::OperationFailed(format!("Failed to complete upload: {e}")))?;

        Ok(Some(total))
    }
}

#[async_trait]
impl S3Client for S3Impl {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, S3Error> {
        let get_object_output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("Failed to get object from S3: {e}");
                if let aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_) =
                    e.into_service_error()
                {
                    S3Error::NotFound(key.to_string())
                } else {
                    S3Error::OperationFailed(error_message)
                }
            })?;

        let body_bytes =
            get_object_output.body.collect().await.map_err(|e| {
                S3Error::OperationFailed(format!("Failed to read S3 object body: {e}"))
            })?;

        Ok(body_bytes.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), S3Error> {
        debug!("Writing {} bytes to s3://{bucket}/{key}", body.len());
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| S3Error::OperationFailed(format!("Failed to put object to S3: {e}")))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        // S3 deletes are silent for missing keys, so check first
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("Failed to stat object in S3: {e}");
                if e.into_service_error().is_not_found() {
                    S3Error::NotFound(key.to_string())
                } else {
                    S3Error::OperationFailed(error_message)
                }
            })?;

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                S3Error::OperationFailed(format!("Failed to delete object from S3: {e}"))
            })?;
        Ok(())
    }

    async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        body: ByteChunkStream,
    ) -> Result<Option<u64>, S3Error> {
        let mut upload_id = None;
        let result = self
            .drive_multipart(bucket, key, content_type, body, &mut upload_id)
            .await;

        if let (Err(e), Some(id)) = (&result, &upload_id) {
            warn!("Streaming upload to s3://{bucket}/{key} failed, aborting: {e}");
            self.abort_multipart(bucket, key, id).await;
        }

        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// Mock S3 client for testing - always available, no conditional compilation needed.
///
/// Clones share the same backing map, so a test can hand one clone to the code
/// under test and inspect the other.
#[derive(Clone, Default)]
pub struct MockS3Client {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    get_failures: Arc<RwLock<HashMap<String, S3Error>>>,
    put_failures: Arc<RwLock<HashMap<String, S3Error>>>,
    put_prefix_failures: Arc<RwLock<Vec<(String, S3Error)>>>,
    delete_failures: Arc<RwLock<HashMap<String, S3Error>>>,
    puts: Arc<AtomicUsize>,
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}:{key}")
}

impl MockS3Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, as if it had been written earlier
    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<Bytes>) -> Self {
        self.objects.write().insert(
            object_key(bucket, key),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
        self
    }

    /// Make reads of one key fail with the given error
    pub fn fail_get(self, bucket: &str, key: &str, error: S3Error) -> Self {
        self.get_failures
            .write()
            .insert(object_key(bucket, key), error);
        self
    }

    /// Make writes (single or streamed) of one key fail with the given error
    pub fn fail_put(self, bucket: &str, key: &str, error: S3Error) -> Self {
        self.put_failures
            .write()
            .insert(object_key(bucket, key), error);
        self
    }

    /// Make writes of every key starting with `prefix` fail
    pub fn fail_put_prefix(self, bucket: &str, prefix: &str, error: S3Error) -> Self {
        self.put_prefix_failures
            .write()
            .push((object_key(bucket, prefix), error));
        self
    }

    /// Make deletes of one key fail with the given error; the object stays
    pub fn fail_delete(self, bucket: &str, key: &str, error: S3Error) -> Self {
        self.delete_failures
            .write()
            .insert(object_key(bucket, key), error);
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects.read().get(&object_key(bucket, key)).cloned()
    }

    /// All keys currently stored in `bucket`, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let prefix = format!("{bucket}:");
        let mut keys: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    /// Number of successful writes, streamed uploads included
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn check_put(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        let full_key = object_key(bucket, key);
        if let Some(error) = self.put_failures.read().get(&full_key) {
            return Err(error.clone());
        }
        match self
            .put_prefix_failures
            .read()
            .iter()
            .find(|(prefix, _)| full_key.starts_with(prefix.as_str()))
        {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl S3Client for MockS3Client {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, S3Error> {
        let cache_key = object_key(bucket, key);
        if let Some(error) = self.get_failures.read().get(&cache_key) {
            return Err(error.clone());
        }
        match self.objects.read().get(&cache_key) {
            Some(object) => Ok(object.body.clone()),
            None => Err(S3Error::NotFound(key.to_string())),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), S3Error> {
        self.check_put(bucket, key)?;
        self.objects.write().insert(
            object_key(bucket, key),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        let full_key = object_key(bucket, key);
        if let Some(error) = self.delete_failures.read().get(&full_key) {
            return Err(error.clone());
        }
        match self.objects.write().remove(&full_key) {
            Some(_) => Ok(()),
            None => Err(S3Error::NotFound(key.to_string())),
        }
    }

    async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        mut body: ByteChunkStream,
    ) -> Result<Option<u64>, S3Error> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                S3Error::OperationFailed(format!("Upload body failed before completion: {e}"))
            })?;
            buffer.extend_from_slice(&chunk);
        }
        if buffer.is_empty() {
            return Ok(None);
        }
        let total = buffer.len() as u64;
        self.put_object(bucket, key, buffer.freeze(), content_type)
            .await?;
        Ok(Some(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_mock_s3_client_get_object_success() {
        let client = MockS3Client::new().with_object("test-bucket", "test-key", "test-content");

        let result = client.get_object("test-bucket", "test-key").await;
        assert_eq!(result.unwrap(), Bytes::from_static(b"test-content"));
    }

    #[tokio::test]
    async fn test_mock_s3_client_default_not_found() {
        let client = MockS3Client::new();

        // Should return NotFound for any key not explicitly configured
        let result = client.get_object("test-bucket", "nonexistent-key").await;
        assert!(matches!(result, Err(S3Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mock_s3_client_injected_failure() {
        let client = MockS3Client::new()
            .with_object("test-bucket", "test-key", "test-content")
            .fail_get(
                "test-bucket",
                "test-key",
                S3Error::OperationFailed("connection reset".to_string()),
            );

        let result = client.get_object("test-bucket", "test-key").await;
        assert!(matches!(result, Err(S3Error::OperationFailed(_))));
    }

    #[tokio::test]
    async fn test_mock_s3_client_put_overwrites_and_counts() {
        let client = MockS3Client::new();

        client
            .put_object("b", "k", Bytes::from_static(b"one"), "text/plain")
            .await
            .unwrap();
        client
            .put_object("b", "k", Bytes::from_static(b"one"), "text/plain")
            .await
            .unwrap();

        assert_eq!(client.keys("b"), vec!["k".to_string()]);
        assert_eq!(client.put_count(), 2);
        let stored = client.object("b", "k").unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"one"));
        assert_eq!(stored.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_mock_s3_client_delete() {
        let client = MockS3Client::new().with_object("b", "k", "body");

        assert!(client.delete_object("b", "k").await.is_ok());
        assert!(matches!(
            client.delete_object("b", "k").await,
            Err(S3Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_s3_client_injected_delete_failure_keeps_object() {
        let client = MockS3Client::new().with_object("b", "k", "body").fail_delete(
            "b",
            "k",
            S3Error::OperationFailed("access denied".to_string()),
        );

        assert!(matches!(
            client.delete_object("b", "k").await,
            Err(S3Error::OperationFailed(_))
        ));
        assert!(client.object("b", "k").is_some());
    }

    #[tokio::test]
    async fn test_mock_s3_client_prefix_put_failure() {
        let client = MockS3Client::new().fail_put_prefix(
            "b",
            "archives/",
            S3Error::OperationFailed("slow down".to_string()),
        );

        let failed = client
            .put_object("b", "archives/a.zip", Bytes::from_static(b"x"), "application/zip")
            .await;
        assert!(matches!(failed, Err(S3Error::OperationFailed(_))));
        client
            .put_object("b", "guests/a.svg", Bytes::from_static(b"x"), "image/svg+xml")
            .await
            .unwrap();
        assert_eq!(client.keys("b"), vec!["guests/a.svg".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_s3_client_upload_stream_empty_creates_nothing() {
        let client = MockS3Client::new();

        let result = client
            .upload_stream("b", "archive.zip", "application/zip", stream::empty().boxed())
            .await;

        assert_eq!(result.unwrap(), None);
        assert!(client.keys("b").is_empty());
        assert_eq!(client.put_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_s3_client_upload_stream_concatenates_chunks() {
        let client = MockS3Client::new();
        let chunks = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];

        let result = client
            .upload_stream("b", "out.txt", "text/plain", stream::iter(chunks).boxed())
            .await;

        assert_eq!(result.unwrap(), Some(11));
        assert_eq!(
            client.object("b", "out.txt").unwrap().body,
            Bytes::from_static(b"hello world")
        );
    }

    #[tokio::test]
    async fn test_mock_s3_client_upload_stream_error_stores_nothing() {
        let client = MockS3Client::new();
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("producer failed")),
        ];

        let result = client
            .upload_stream("b", "out.txt", "text/plain", stream::iter(chunks).boxed())
            .await;

        assert!(matches!(result, Err(S3Error::OperationFailed(_))));
        assert!(client.object("b", "out.txt").is_none());
    }
}
