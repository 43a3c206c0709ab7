use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use common_s3::{ByteChunkStream, S3Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::generator::SVG_MEDIA_TYPE;
use crate::artifact::raster::PNG_MEDIA_TYPE;
use crate::error::PipelineError;

pub const ZIP_MEDIA_TYPE: &str = "application/zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Vector,
    Raster,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Vector => "svg",
            ArtifactFormat::Raster => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactFormat::Vector => SVG_MEDIA_TYPE,
            ArtifactFormat::Raster => PNG_MEDIA_TYPE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactFormat::Vector => "vector",
            ArtifactFormat::Raster => "raster",
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" | "svg" => Ok(ArtifactFormat::Vector),
            "raster" | "png" => Ok(ArtifactFormat::Raster),
            other => Err(PipelineError::InvalidArgument(format!(
                "unknown artifact format '{other}'"
            ))),
        }
    }
}

/// Artifact bytes tagged with their format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Vector(Bytes),
    Raster(Bytes),
}

impl Artifact {
    pub fn new(format: ArtifactFormat, bytes: Bytes) -> Self {
        match format {
            ArtifactFormat::Vector => Artifact::Vector(bytes),
            ArtifactFormat::Raster => Artifact::Raster(bytes),
        }
    }

    pub fn format(&self) -> ArtifactFormat {
        match self {
            Artifact::Vector(_) => ArtifactFormat::Vector,
            Artifact::Raster(_) => ArtifactFormat::Raster,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        match self {
            Artifact::Vector(bytes) | Artifact::Raster(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Artifact::Vector(bytes) | Artifact::Raster(bytes) => bytes,
        }
    }
}

/// Where a stored artifact of a known format lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub key: String,
    pub format: ArtifactFormat,
}

impl ArtifactLocation {
    pub fn new(key: impl Into<String>, format: ArtifactFormat) -> Self {
        Self {
            key: key.into(),
            format,
        }
    }
}

/// The outcome of a fallback read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub artifact: Artifact,
    pub key: String,
    pub used_fallback: bool,
}

impl ResolvedArtifact {
    pub fn format_used(&self) -> ArtifactFormat {
        self.artifact.format()
    }
}

/// Artifact reads and writes against one bucket
#[derive(Clone)]
pub struct ArtifactStore {
    client: Arc<dyn S3Client>,
    bucket: String,
    public_base_url: Option<String>,
}

impl ArtifactStore {
    pub fn new(
        client: Arc<dyn S3Client>,
        bucket: impl Into<String>,
        public_base_url: Option<String>,
    ) -> Result<Self, PipelineError> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(PipelineError::Config(
                "artifact bucket is not configured".to_string(),
            ));
        }
        Ok(Self {
            client,
            bucket,
            public_base_url: public_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// How callers outside the service refer to a stored object
    pub fn locator(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("s3://{}/{key}", self.bucket),
        }
    }

    /// Overwrites whatever is stored under `key`
    pub async fn write(&self, key: &str, artifact: &Artifact) -> Result<String, PipelineError> {
        let format = artifact.format();
        self.client
            .put_object(
                &self.bucket,
                key,
                artifact.bytes().clone(),
                format.content_type(),
            )
            .await?;
        metrics::counter!("guest_artifacts_store_writes_total", "format" => format.as_str())
            .increment(1);
        Ok(self.locator(key))
    }

    pub async fn read(&self, key: &str) -> Result<Bytes, PipelineError> {
        Ok(self.client.get_object(&self.bucket, key).await?)
    }

    pub async fn read_location(
        &self,
        location: &ArtifactLocation,
    ) -> Result<Artifact, PipelineError> {
        let bytes = self.read(&location.key).await?;
        Ok(Artifact::new(location.format, bytes))
    }

    pub async fn delete(&self, key: &str) -> Result<(), PipelineError> {
        Ok(self.client.delete_object(&self.bucket, key).await?)
    }

    /// Delete each key, logging failures instead of returning them
    pub async fn delete_best_effort(&self, keys: &[&str]) {
        for key in keys {
            match self.delete(key).await {
                Ok(()) => debug!(key, "deleted artifact"),
                Err(PipelineError::NotFound { .. }) => debug!(key, "artifact already absent"),
                Err(e) => {
                    warn!(key, error = %e, "failed to delete artifact, continuing");
                    metrics::counter!("guest_artifacts_store_delete_failures_total").increment(1);
                }
            }
        }
    }

    /// Read `primary`, falling back to `fallback` only when `primary` is missing.
    ///
    /// Both missing is an ordinary outcome, reported as `NotFound` listing both
    /// keys. A transport failure on either read is returned as-is.
    pub async fn resolve_readable(
        &self,
        primary: &ArtifactLocation,
        fallback: &ArtifactLocation,
    ) -> Result<ResolvedArtifact, PipelineError> {
        match self.read_location(primary).await {
            Ok(artifact) => {
                return Ok(ResolvedArtifact {
                    artifact,
                    key: primary.key.clone(),
                    used_fallback: false,
                })
            }
            Err(PipelineError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        match self.read_location(fallback).await {
            Ok(artifact) => {
                metrics::counter!("guest_artifacts_store_fallback_reads_total").increment(1);
                debug!(
                    primary = %primary.key,
                    fallback = %fallback.key,
                    "primary artifact missing, served fallback"
                );
                Ok(ResolvedArtifact {
                    artifact,
                    key: fallback.key.clone(),
                    used_fallback: true,
                })
            }
            Err(PipelineError::NotFound { .. }) => Err(PipelineError::NotFound {
                attempted: vec![primary.key.clone(), fallback.key.clone()],
            }),
            Err(e) => Err(e),
        }
    }

    /// Stream a zip archive into `key`. `Ok(None)` means the stream carried no
    /// bytes and nothing was created.
    pub async fn upload_archive(
        &self,
        key: &str,
        body: ByteChunkStream,
    ) -> Result<Option<u64>, PipelineError> {
        Ok(self
            .client
            .upload_stream(&self.bucket, key, ZIP_MEDIA_TYPE, body)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_s3::{MockS3Client, S3Error};

    const BUCKET: &str = "artifacts";

    fn store(client: &MockS3Client) -> ArtifactStore {
        ArtifactStore::new(Arc::new(client.clone()), BUCKET, None).unwrap()
    }

    fn locations() -> (ArtifactLocation, ArtifactLocation) {
        (
            ArtifactLocation::new("qr/e/a.svg", ArtifactFormat::Vector),
            ArtifactLocation::new("png/e/a.png", ArtifactFormat::Raster),
        )
    }

    #[test]
    fn test_missing_bucket_is_config_error() {
        let result = ArtifactStore::new(Arc::new(MockS3Client::new()), " ", None);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_locator() {
        let client = Arc::new(MockS3Client::new());
        let plain = ArtifactStore::new(client.clone(), BUCKET, None).unwrap();
        assert_eq!(plain.locator("a/b.svg"), "s3://artifacts/a/b.svg");

        let public =
            ArtifactStore::new(client, BUCKET, Some("https://cdn.example.com/".to_string()))
                .unwrap();
        assert_eq!(public.locator("a/b.svg"), "https://cdn.example.com/a/b.svg");
    }

    #[tokio::test]
    async fn test_resolve_readable_prefers_primary() {
        let (primary, fallback) = locations();
        let client = MockS3Client::new()
            .with_object(BUCKET, &primary.key, "<svg/>")
            .with_object(BUCKET, &fallback.key, "png");

        let resolved = store(&client)
            .resolve_readable(&primary, &fallback)
            .await
            .unwrap();

        assert_eq!(resolved.format_used(), ArtifactFormat::Vector);
        assert_eq!(resolved.key, primary.key);
        assert!(!resolved.used_fallback);
    }

    #[tokio::test]
    async fn test_resolve_readable_falls_back() {
        let (primary, fallback) = locations();
        let client = MockS3Client::new().with_object(BUCKET, &fallback.key, "png");

        let resolved = store(&client)
            .resolve_readable(&primary, &fallback)
            .await
            .unwrap();

        assert_eq!(resolved.format_used(), ArtifactFormat::Raster);
        assert_eq!(resolved.artifact, Artifact::Raster(Bytes::from_static(b"png")));
        assert!(resolved.used_fallback);
    }

    #[tokio::test]
    async fn test_resolve_readable_neither_present() {
        let (primary, fallback) = locations();
        let client = MockS3Client::new();

        let result = store(&client).resolve_readable(&primary, &fallback).await;

        assert_eq!(
            result,
            Err(PipelineError::NotFound {
                attempted: vec![primary.key.clone(), fallback.key.clone()],
            })
        );
    }

    #[tokio::test]
    async fn test_resolve_readable_does_not_mask_transport_errors() {
        let (primary, fallback) = locations();
        let client = MockS3Client::new()
            .with_object(BUCKET, &fallback.key, "png")
            .fail_get(
                BUCKET,
                &primary.key,
                S3Error::OperationFailed("connection reset".to_string()),
            );

        let result = store(&client).resolve_readable(&primary, &fallback).await;

        assert!(matches!(result, Err(PipelineError::TransientIo(_))));
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let client = MockS3Client::new();
        let store = store(&client);
        let artifact = Artifact::Vector(Bytes::from_static(b"<svg/>"));

        let first = store.write("qr/e/a.svg", &artifact).await.unwrap();
        let after_first = client.object(BUCKET, "qr/e/a.svg");
        let second = store.write("qr/e/a.svg", &artifact).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.object(BUCKET, "qr/e/a.svg"), after_first);
        assert_eq!(client.keys(BUCKET), vec!["qr/e/a.svg".to_string()]);
        assert_eq!(after_first.unwrap().content_type, SVG_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_delete_reports_not_found() {
        let client = MockS3Client::new().with_object(BUCKET, "k", "v");
        let store = store(&client);

        assert!(store.delete("k").await.is_ok());
        assert!(matches!(
            store.delete("k").await,
            Err(PipelineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_best_effort_never_fails() {
        let client = MockS3Client::new().with_object(BUCKET, "present", "v");
        let store = store(&client);

        store.delete_best_effort(&["present", "absent"]).await;

        assert!(client.keys(BUCKET).is_empty());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("SVG".parse::<ArtifactFormat>().unwrap(), ArtifactFormat::Vector);
        assert_eq!("raster".parse::<ArtifactFormat>().unwrap(), ArtifactFormat::Raster);
        assert!("gif".parse::<ArtifactFormat>().is_err());
    }
}
